//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; all parsing lives in `loader.rs` and `validate.rs`.
//! - Per-channel settings are resolved once into a [`ChannelTable`] so runtime
//!   code never branches on the channel kind.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use telematic_core::{Channel, ChannelSelector};
use url::Url;

/// Fully validated bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Channels this process serves.
    pub selector: ChannelSelector,
    /// Bus connection settings.
    pub nats: NatsSettings,
    /// Sink connection settings.
    pub influx: InfluxSettings,
    /// Per-channel subject prefix, allowlist, and sink target.
    pub channels: ChannelTable,
    /// Liveness probe cadence and limits.
    pub probe: ProbeSettings,
    /// Topic refresh cadence.
    pub refresh_period: Duration,
    /// Connect retry policy.
    pub retry: RetrySettings,
    /// Listing endpoint settings.
    pub http: HttpSettings,
    /// Connection string for the event database.
    pub database_url: String,
    /// Requested log format (`json` or `pretty`), if any.
    pub log_format: Option<String>,
}

impl BridgeConfig {
    /// Profiles for the channels selected at startup, in startup order.
    #[must_use]
    pub fn active_profiles(&self) -> Vec<&ChannelProfile> {
        self.selector
            .channels()
            .into_iter()
            .filter_map(|channel| self.channels.get(channel))
            .collect()
    }
}

/// Bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    /// Server address.
    pub url: Url,
    /// Reconnect limit; `None` retries forever.
    pub max_reconnects: Option<usize>,
}

/// Sink connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxSettings {
    /// Base URL of the InfluxDB HTTP API.
    pub url: Url,
    /// Organisation owning the buckets.
    pub org: String,
    /// API token; empty disables the authorization header.
    pub token: String,
}

/// Liveness probe settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Cadence between probe cycles.
    pub period: Duration,
    /// Reply deadline for a single probe.
    pub timeout: Duration,
    /// Maximum probes in flight within one cycle.
    pub concurrency: usize,
}

/// Connect retry policy settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the retry delay.
    pub max: Duration,
    /// Multiplicative growth between retries.
    pub factor: f64,
}

/// Listing endpoint settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// Address the listing endpoint binds to.
    pub bind_addr: SocketAddr,
}

/// Everything a channel worker needs to know about its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProfile {
    /// Channel described by this profile.
    pub channel: Channel,
    /// Subject token inserted after the unit id in telemetry subjects.
    pub subject_prefix: String,
    /// Units whose telemetry this channel forwards.
    pub unit_ids: Vec<String>,
    /// Sink bucket receiving this channel's telemetry.
    pub sink_bucket: String,
}

impl ChannelProfile {
    /// Telemetry subject for one unit: `<unit_id>.<subject_prefix>.>`.
    #[must_use]
    pub fn telemetry_subject(&self, unit_id: &str) -> String {
        format!("{unit_id}.{}.>", self.subject_prefix)
    }
}

/// Channel to profile mapping selected once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTable {
    profiles: BTreeMap<Channel, ChannelProfile>,
}

impl ChannelTable {
    /// Build a table from resolved profiles.
    #[must_use]
    pub fn new(profiles: impl IntoIterator<Item = ChannelProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.channel, profile))
                .collect(),
        }
    }

    /// Profile for a channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&ChannelProfile> {
        self.profiles.get(&channel)
    }

    /// Iterate profiles in channel order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelProfile> {
        self.profiles.values()
    }
}
