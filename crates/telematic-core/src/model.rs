//! Channels, registered units, and events.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParseChannelError, RegistrationError};

/// Fields the bridge writes into a registration reply; inbound copies are discarded.
const ENRICHED_KEYS: [&str; 5] = [
    "unit_id",
    "event_id",
    "event_name",
    "location",
    "testing_type",
];

/// Isolated subscription-and-sink scope for one class of telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Vehicle platform telemetry.
    Platform,
    /// Roadside (streets) telemetry.
    Streets,
    /// Cloud infrastructure telemetry.
    Cloud,
}

impl Channel {
    /// Every concrete channel, in startup order.
    pub const ALL: [Self; 3] = [Self::Platform, Self::Streets, Self::Cloud];

    /// Lowercase name used in logs, metrics labels, and default subjects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Streets => "streets",
            Self::Cloud => "cloud",
        }
    }

    /// Uppercase token used for selectors and environment keys.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Platform => "PLATFORM",
            Self::Streets => "STREETS",
            Self::Cloud => "CLOUD",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Which channels the process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelector {
    /// Serve exactly one channel.
    Single(Channel),
    /// Start one independent worker per concrete channel.
    All,
}

impl ChannelSelector {
    /// Expand the selector into the concrete channels it covers.
    #[must_use]
    pub fn channels(self) -> Vec<Channel> {
        match self {
            Self::Single(channel) => vec![channel],
            Self::All => Channel::ALL.to_vec(),
        }
    }
}

impl FromStr for ChannelSelector {
    type Err = ParseChannelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        if normalized == "ALL" {
            return Ok(Self::All);
        }
        Channel::ALL
            .into_iter()
            .find(|channel| channel.token() == normalized)
            .map(Self::Single)
            .ok_or_else(|| ParseChannelError {
                value: value.to_string(),
            })
    }
}

/// Event status values written back to the event service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// At least one attached unit answered its last probe.
    Live,
    /// No attached unit is known to be alive.
    NotLive,
}

impl EventStatus {
    /// Wire value stored by the event service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::NotLive => "",
        }
    }

    /// Decide the status for an aggregated liveness tally.
    #[must_use]
    pub const fn from_tally(count: i64) -> Self {
        if count > 0 { Self::Live } else { Self::NotLive }
    }
}

/// Event metadata resolved for a unit at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEvent {
    /// Event identifier.
    pub id: i64,
    /// Human-readable event name.
    pub name: String,
    /// Facility name where the event takes place.
    pub location: String,
    /// Testing type label for the event.
    pub testing_type: String,
}

/// Parsed inbound registration payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRequest {
    /// Identifier the unit announced.
    pub unit_id: String,
    /// Every other field from the payload, preserved for the reply.
    pub fields: Map<String, Value>,
}

impl RegistrationRequest {
    /// Parse a registration payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not a JSON object carrying a
    /// string `unit_id`.
    pub fn parse(payload: &[u8]) -> Result<Self, RegistrationError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|source| RegistrationError::InvalidJson { source })?;
        let Value::Object(mut fields) = value else {
            return Err(RegistrationError::NotAnObject);
        };
        let unit_id = match fields.get("unit_id") {
            Some(Value::String(unit_id)) if !unit_id.trim().is_empty() => unit_id.clone(),
            _ => return Err(RegistrationError::MissingUnitId),
        };
        for key in ENRICHED_KEYS {
            fields.remove(key);
        }
        Ok(Self { unit_id, fields })
    }

    /// Attach the resolved event, producing the registry entry.
    #[must_use]
    pub fn attach(self, event: &ActiveEvent) -> RegisteredUnit {
        RegisteredUnit {
            unit_id: self.unit_id,
            event_id: event.id,
            event_name: event.name.clone(),
            location: event.location.clone(),
            testing_type: event.testing_type.clone(),
            fields: self.fields,
        }
    }
}

/// A unit currently attached to an event.
///
/// Serialises to the registration reply: the inbound payload plus the event
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredUnit {
    /// Stable unit identifier.
    pub unit_id: String,
    /// Event the unit is attached to.
    pub event_id: i64,
    /// Event name.
    pub event_name: String,
    /// Facility name of the event.
    pub location: String,
    /// Testing type of the event.
    pub testing_type: String,
    /// Remaining fields from the registration payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
