//! Collaborator seams for event metadata, event status, and the time-series sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{LookupResult, SinkResult};
use crate::model::{ActiveEvent, EventStatus};
use crate::point::DataPoint;

/// Resolves units to the event they are attached to.
#[async_trait]
pub trait EventLookup: Send + Sync {
    /// Find the event whose unit assignment window contains `at`.
    async fn find_active_event(
        &self,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> LookupResult<Option<ActiveEvent>>;
}

/// Writes event status back to the event service.
#[async_trait]
pub trait EventStatusService: Send + Sync {
    /// Record the status for one event.
    async fn set_event_status(&self, status: EventStatus, event_id: i64) -> LookupResult<()>;
}

/// Time-series destination for telemetry.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Address of the sink, for logging.
    fn address(&self) -> &str;

    /// Establish (or verify) connectivity.
    async fn connect(&self) -> SinkResult<()>;

    /// Whether the last connectivity check succeeded.
    fn is_connected(&self) -> bool;

    /// Write one data point.
    async fn write(&self, point: &DataPoint) -> SinkResult<()>;
}
