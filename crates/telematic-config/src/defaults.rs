//! Default values applied when an environment variable is absent.
//!
//! # Design
//! - Keep cadence defaults explicit so operators can audit them in one place.

/// Default NATS server address.
pub const NATS_URL: &str = "nats://127.0.0.1:4222";
/// Default NATS reconnect limit; negative means unlimited.
pub const NATS_MAX_RECONNECTS: i64 = -1;
/// Default InfluxDB address.
pub const INFLUX_URL: &str = "http://127.0.0.1:8086";
/// Default liveness probe cadence (ms).
pub const PROBE_PERIOD_MS: u64 = 5_000;
/// Default per-probe reply deadline (ms).
pub const PROBE_TIMEOUT_MS: u64 = 2_000;
/// Default bound on concurrent probes per cycle.
pub const PROBE_CONCURRENCY: usize = 64;
/// Default topic refresh cadence (ms).
pub const REFRESH_PERIOD_MS: u64 = 30_000;
/// Default initial connect retry delay (ms).
pub const CONNECT_RETRY_MS: u64 = 100;
/// Default connect retry delay cap (ms).
pub const CONNECT_RETRY_MAX_MS: u64 = 30_000;
/// Default growth factor between connect retries.
pub const CONNECT_RETRY_FACTOR: f64 = 2.0;
/// Default listing endpoint bind address.
pub const HTTP_ADDR: &str = "0.0.0.0:8080";
