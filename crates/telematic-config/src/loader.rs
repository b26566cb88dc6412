//! Environment loading for [`BridgeConfig`].
//!
//! Values are read through a lookup function so tests can feed fixed maps
//! instead of mutating the process environment.

use std::time::Duration;

use telematic_core::{Channel, ChannelSelector};

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    BridgeConfig, ChannelProfile, ChannelTable, HttpSettings, InfluxSettings, NatsSettings,
    ProbeSettings, RetrySettings,
};
use crate::validate::{
    parse_factor, parse_list, parse_positive_count, parse_positive_millis, parse_reconnects,
    parse_socket_addr, parse_subject_token, parse_url,
};

/// Channel selector (`PLATFORM`, `STREETS`, `CLOUD`, `ALL`).
pub const CHANNEL_VAR: &str = "TELEMATIC_CHANNEL";
/// Bus address.
pub const NATS_URL_VAR: &str = "TELEMATIC_NATS_URL";
/// Bus reconnect limit.
pub const NATS_MAX_RECONNECTS_VAR: &str = "TELEMATIC_NATS_MAX_RECONNECTS";
/// Sink address.
pub const INFLUX_URL_VAR: &str = "TELEMATIC_INFLUX_URL";
/// Sink organisation.
pub const INFLUX_ORG_VAR: &str = "TELEMATIC_INFLUX_ORG";
/// Sink API token.
pub const INFLUX_TOKEN_VAR: &str = "TELEMATIC_INFLUX_TOKEN";
/// Probe cadence (ms).
pub const PROBE_PERIOD_VAR: &str = "TELEMATIC_PROBE_PERIOD_MS";
/// Probe reply deadline (ms).
pub const PROBE_TIMEOUT_VAR: &str = "TELEMATIC_PROBE_TIMEOUT_MS";
/// Probe fan-out bound.
pub const PROBE_CONCURRENCY_VAR: &str = "TELEMATIC_PROBE_CONCURRENCY";
/// Refresh cadence (ms).
pub const REFRESH_PERIOD_VAR: &str = "TELEMATIC_REFRESH_PERIOD_MS";
/// Initial connect retry delay (ms).
pub const CONNECT_RETRY_VAR: &str = "TELEMATIC_CONNECT_RETRY_MS";
/// Connect retry cap (ms).
pub const CONNECT_RETRY_MAX_VAR: &str = "TELEMATIC_CONNECT_RETRY_MAX_MS";
/// Connect retry growth factor.
pub const CONNECT_RETRY_FACTOR_VAR: &str = "TELEMATIC_CONNECT_RETRY_FACTOR";
/// Listing endpoint bind address.
pub const HTTP_ADDR_VAR: &str = "TELEMATIC_HTTP_ADDR";
/// Log output format.
pub const LOG_FORMAT_VAR: &str = "TELEMATIC_LOG_FORMAT";
/// Event database connection string.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

impl BridgeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value fails
    /// validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// The channel selector is validated first so an invalid selector aborts
    /// before anything else is inspected.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value fails
    /// validation.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let selector_raw = get(CHANNEL_VAR).ok_or(ConfigError::MissingField { field: CHANNEL_VAR })?;
        let selector = selector_raw
            .parse::<ChannelSelector>()
            .map_err(|err| ConfigError::InvalidChannelSelector { value: err.value })?;

        let nats = NatsSettings {
            url: parse_url(
                NATS_URL_VAR,
                &get(NATS_URL_VAR).unwrap_or_else(|| defaults::NATS_URL.to_string()),
                &["nats", "tls", "ws", "wss"],
            )?,
            max_reconnects: get(NATS_MAX_RECONNECTS_VAR).map_or_else(
                || Ok(usize::try_from(defaults::NATS_MAX_RECONNECTS).ok()),
                |raw| parse_reconnects(NATS_MAX_RECONNECTS_VAR, &raw),
            )?,
        };

        let influx = InfluxSettings {
            url: parse_url(
                INFLUX_URL_VAR,
                &get(INFLUX_URL_VAR).unwrap_or_else(|| defaults::INFLUX_URL.to_string()),
                &["http", "https"],
            )?,
            org: get(INFLUX_ORG_VAR).unwrap_or_default(),
            token: get(INFLUX_TOKEN_VAR).unwrap_or_default(),
        };

        let mut profiles = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            profiles.push(load_profile(channel, &get)?);
        }

        let millis = |key: &str, default_ms: u64| {
            get(key).map_or(Ok(Duration::from_millis(default_ms)), |raw| {
                parse_positive_millis(key, &raw)
            })
        };

        let probe = ProbeSettings {
            period: millis(PROBE_PERIOD_VAR, defaults::PROBE_PERIOD_MS)?,
            timeout: millis(PROBE_TIMEOUT_VAR, defaults::PROBE_TIMEOUT_MS)?,
            concurrency: get(PROBE_CONCURRENCY_VAR).map_or(
                Ok(defaults::PROBE_CONCURRENCY),
                |raw| parse_positive_count(PROBE_CONCURRENCY_VAR, &raw),
            )?,
        };
        let refresh_period = millis(REFRESH_PERIOD_VAR, defaults::REFRESH_PERIOD_MS)?;

        let retry = RetrySettings {
            initial: millis(CONNECT_RETRY_VAR, defaults::CONNECT_RETRY_MS)?,
            max: millis(CONNECT_RETRY_MAX_VAR, defaults::CONNECT_RETRY_MAX_MS)?,
            factor: get(CONNECT_RETRY_FACTOR_VAR).map_or(
                Ok(defaults::CONNECT_RETRY_FACTOR),
                |raw| parse_factor(CONNECT_RETRY_FACTOR_VAR, &raw),
            )?,
        };
        if retry.max < retry.initial {
            return Err(ConfigError::InvalidField {
                field: CONNECT_RETRY_MAX_VAR.to_string(),
                value: Some(retry.max.as_millis().to_string()),
                reason: "below_initial_delay",
            });
        }

        let http = HttpSettings {
            bind_addr: parse_socket_addr(
                HTTP_ADDR_VAR,
                &get(HTTP_ADDR_VAR).unwrap_or_else(|| defaults::HTTP_ADDR.to_string()),
            )?,
        };

        let database_url = get(DATABASE_URL_VAR).ok_or(ConfigError::MissingField {
            field: DATABASE_URL_VAR,
        })?;

        let log_format = get(LOG_FORMAT_VAR).map(|raw| raw.trim().to_ascii_lowercase());

        Ok(Self {
            selector,
            nats,
            influx,
            channels: ChannelTable::new(profiles),
            probe,
            refresh_period,
            retry,
            http,
            database_url,
            log_format,
        })
    }
}

fn load_profile<G>(channel: Channel, get: &G) -> ConfigResult<ChannelProfile>
where
    G: Fn(&str) -> Option<String>,
{
    let token = channel.token();
    let subject_key = format!("TELEMATIC_{token}_SUBJECT");
    let units_key = format!("TELEMATIC_{token}_UNIT_IDS");
    let bucket_key = format!("TELEMATIC_{token}_BUCKET");

    let subject_prefix = get(&subject_key).map_or_else(
        || Ok(channel.as_str().to_string()),
        |raw| parse_subject_token(&subject_key, &raw),
    )?;
    let unit_ids = get(&units_key)
        .map(|raw| parse_list(&raw))
        .unwrap_or_default();
    let sink_bucket = get(&bucket_key)
        .map(|raw| raw.trim().to_string())
        .unwrap_or_else(|| format!("{}-bucket", channel.as_str()));

    Ok(ChannelProfile {
        channel,
        subject_prefix,
        unit_ids,
        sink_bucket,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "platform"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
        ]))
        .unwrap();

        assert_eq!(config.selector, ChannelSelector::Single(Channel::Platform));
        assert_eq!(config.nats.url.as_str(), defaults::NATS_URL);
        assert_eq!(config.influx.url.as_str(), "http://127.0.0.1:8086/");
        assert_eq!(config.nats.max_reconnects, None);
        assert_eq!(config.probe.period, Duration::from_millis(5_000));
        assert_eq!(config.refresh_period, Duration::from_millis(30_000));
        assert_eq!(config.retry.initial, Duration::from_millis(100));
        assert_eq!(config.active_profiles().len(), 1);
        let platform = config.channels.get(Channel::Platform).unwrap();
        assert_eq!(platform.subject_prefix, "platform");
        assert!(platform.unit_ids.is_empty());
        assert_eq!(platform.sink_bucket, "platform-bucket");
    }

    #[test]
    fn channel_table_reads_per_channel_overrides() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "ALL"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
            ("TELEMATIC_STREETS_SUBJECT", "rsu"),
            ("TELEMATIC_STREETS_UNIT_IDS", "RSU-1, RSU-2"),
            ("TELEMATIC_STREETS_BUCKET", "streets-data"),
        ]))
        .unwrap();

        assert_eq!(config.active_profiles().len(), 3);
        let streets = config.channels.get(Channel::Streets).unwrap();
        assert_eq!(streets.subject_prefix, "rsu");
        assert_eq!(streets.unit_ids, vec!["RSU-1", "RSU-2"]);
        assert_eq!(streets.sink_bucket, "streets-data");
    }

    #[test]
    fn invalid_selector_is_rejected_before_other_fields() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "INVALID"),
            (PROBE_PERIOD_VAR, "not-a-number"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidChannelSelector {
                value: "INVALID".into()
            }
        );
    }

    #[test]
    fn missing_selector_and_database_are_reported() {
        assert_eq!(
            BridgeConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingField { field: CHANNEL_VAR }
        );
        assert_eq!(
            BridgeConfig::from_lookup(lookup(&[(CHANNEL_VAR, "CLOUD")])).unwrap_err(),
            ConfigError::MissingField {
                field: DATABASE_URL_VAR
            }
        );
    }

    #[test]
    fn retry_cap_must_not_undercut_initial_delay() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "CLOUD"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
            (CONNECT_RETRY_VAR, "500"),
            (CONNECT_RETRY_MAX_VAR, "100"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                reason: "below_initial_delay",
                ..
            }
        ));
    }

    #[test]
    fn zero_probe_period_is_rejected() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "CLOUD"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
            (PROBE_PERIOD_VAR, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                reason: "must_be_positive",
                ..
            }
        ));
    }

    #[test]
    fn malformed_bus_and_sink_addresses_abort_loading() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "PLATFORM"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
            (NATS_URL_VAR, "nats://host:notaport"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, reason: "malformed_url", .. }
                if field == NATS_URL_VAR
        ));

        let err = BridgeConfig::from_lookup(lookup(&[
            (CHANNEL_VAR, "PLATFORM"),
            (DATABASE_URL_VAR, "postgres://localhost/telematic"),
            (INFLUX_URL_VAR, "http://in flux:99999"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, reason: "malformed_url", .. }
                if field == INFLUX_URL_VAR
        ));
    }
}
