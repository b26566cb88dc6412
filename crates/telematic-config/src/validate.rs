//! Parsing helpers for raw environment values.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, ConfigResult};

fn invalid(field: &str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: Some(value.to_string()),
        reason,
    }
}

pub(crate) fn parse_positive_millis(field: &str, raw: &str) -> ConfigResult<Duration> {
    let millis = u64::from_str(raw.trim()).map_err(|_| invalid(field, raw, "not_an_integer"))?;
    if millis == 0 {
        return Err(invalid(field, raw, "must_be_positive"));
    }
    Ok(Duration::from_millis(millis))
}

pub(crate) fn parse_positive_count(field: &str, raw: &str) -> ConfigResult<usize> {
    let count = usize::from_str(raw.trim()).map_err(|_| invalid(field, raw, "not_an_integer"))?;
    if count == 0 {
        return Err(invalid(field, raw, "must_be_positive"));
    }
    Ok(count)
}

pub(crate) fn parse_reconnects(field: &str, raw: &str) -> ConfigResult<Option<usize>> {
    let limit = i64::from_str(raw.trim()).map_err(|_| invalid(field, raw, "not_an_integer"))?;
    if limit < 0 {
        return Ok(None);
    }
    usize::try_from(limit)
        .map(Some)
        .map_err(|_| invalid(field, raw, "out_of_range"))
}

pub(crate) fn parse_factor(field: &str, raw: &str) -> ConfigResult<f64> {
    let factor = f64::from_str(raw.trim()).map_err(|_| invalid(field, raw, "not_a_number"))?;
    if !factor.is_finite() || factor < 1.0 {
        return Err(invalid(field, raw, "must_be_at_least_one"));
    }
    Ok(factor)
}

pub(crate) fn parse_socket_addr(field: &str, raw: &str) -> ConfigResult<SocketAddr> {
    SocketAddr::from_str(raw.trim()).map_err(|_| invalid(field, raw, "not_a_socket_address"))
}

/// Parse an absolute URL whose scheme is one of `schemes` and which names a host.
pub(crate) fn parse_url(field: &str, raw: &str, schemes: &[&str]) -> ConfigResult<Url> {
    let url = raw
        .trim()
        .parse::<Url>()
        .map_err(|_| invalid(field, raw, "malformed_url"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(field, raw, "unsupported_scheme"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(field, raw, "missing_host"));
    }
    Ok(url)
}

/// Split a comma separated list, dropping blanks and duplicates while keeping order.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

pub(crate) fn parse_subject_token(field: &str, raw: &str) -> ConfigResult<String> {
    let token = raw.trim();
    if token.is_empty() || token.contains(['*', '>', ' ']) {
        return Err(invalid(field, raw, "invalid_subject_prefix"));
    }
    Ok(token.trim_matches('.').to_string())
}
