//! InfluxDB v2 sink over the HTTP write API.
//!
//! # Design
//! - `connect` is a `/ping` health check; the HTTP client itself is pooled.
//! - A transport failure during a write clears the connected flag; the
//!   refresher re-dials the sink on its next tick.
//! - Endpoints are resolved against the base URL once, so a base with a path
//!   prefix (a reverse proxy) keeps it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use telematic_core::{DataPoint, SinkError, SinkResult, SinkWriter};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes line protocol into one InfluxDB bucket.
pub struct InfluxSink {
    client: Client,
    base_url: Url,
    ping_url: Url,
    write_url: Url,
    org: String,
    token: String,
    bucket: String,
    connected: AtomicBool,
}

impl InfluxSink {
    /// Sink for `bucket` at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints cannot be resolved against
    /// `base_url` or the HTTP client cannot be constructed.
    pub fn new(
        mut base_url: Url,
        org: impl Into<String>,
        token: impl Into<String>,
        bucket: impl Into<String>,
    ) -> SinkResult<Self> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let endpoint = |path: &str| {
            base_url.join(path).map_err(|err| SinkError::Connect {
                address: base_url.to_string(),
                detail: err.to_string(),
            })
        };
        let ping_url = endpoint("ping")?;
        let write_url = endpoint("api/v2/write")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| SinkError::Connect {
                address: base_url.to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url,
            ping_url,
            write_url,
            org: org.into(),
            token: token.into(),
            bucket: bucket.into(),
            connected: AtomicBool::new(false),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
        }
    }
}

#[async_trait]
impl SinkWriter for InfluxSink {
    fn address(&self) -> &str {
        self.base_url.as_str()
    }

    async fn connect(&self) -> SinkResult<()> {
        let response = self
            .client
            .get(self.ping_url.clone())
            .send()
            .await
            .map_err(|err| {
                self.connected.store(false, Ordering::SeqCst);
                SinkError::Connect {
                    address: self.base_url.to_string(),
                    detail: err.to_string(),
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(SinkError::Status {
                operation: "ping",
                status: status.as_u16(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, point: &DataPoint) -> SinkResult<()> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        let body = point.to_line_protocol();
        let request = self
            .client
            .post(self.write_url.clone())
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        let response = self.authorize(request).send().await.map_err(|err| {
            self.connected.store(false, Ordering::SeqCst);
            SinkError::Write {
                bucket: self.bucket.clone(),
                detail: err.to_string(),
            }
        })?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => {
                debug!(bucket = %self.bucket, measurement = %point.measurement, "point written");
                Ok(())
            }
            status => Err(SinkError::Status {
                operation: "write",
                status: status.as_u16(),
            }),
        }
    }
}
