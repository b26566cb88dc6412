//! PostgreSQL event store.
//!
//! # Design
//! - Queries are plain SQL constants; rows decode through `FromRow` structs.
//! - Implements both lookup and status seams so one pool serves the control plane.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use telematic_core::{
    ActiveEvent, EventLookup, EventStatus, EventStatusService, LookupResult,
};
use tracing::debug;

use crate::error::{DataError, Result};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_ACTIVE_EVENT: &str = r"
    SELECT e.id::BIGINT AS id,
           e.name AS name,
           COALESCE(l.facility_name, '') AS location,
           COALESCE(t.name, '') AS testing_type
    FROM units u
    JOIN event_units eu ON eu.unit_id = u.id
    JOIN events e ON e.id = eu.event_id
    LEFT JOIN locations l ON l.id = e.location_id
    LEFT JOIN testing_types t ON t.id = e.testing_type_id
    WHERE u.unit_identifier = $1
      AND eu.start_time <= $2
      AND eu.end_time >= $2
    ORDER BY eu.start_time DESC
    LIMIT 1
";

const UPDATE_EVENT_STATUS: &str = r"
    UPDATE events SET status = $1 WHERE id = $2
";

/// Database-backed event lookup and status writer.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct ActiveEventRow {
    id: i64,
    name: String,
    location: String,
    testing_type: String,
}

impl From<ActiveEventRow> for ActiveEvent {
    fn from(row: ActiveEventRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            location: row.location,
            testing_type: row.testing_type,
        }
    }
}

impl EventStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that dials on first use, so an unavailable database
    /// surfaces as lookup errors instead of a startup failure.
    ///
    /// # Errors
    ///
    /// Returns an error if `database_url` cannot be parsed.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)
            .map_err(|source| DataError::ConnectFailed { source })?;
        Ok(Self::new(pool))
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Event whose unit assignment window contains `at`, newest window first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn active_event(
        &self,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ActiveEvent>> {
        let row = sqlx::query_as::<_, ActiveEventRow>(SELECT_ACTIVE_EVENT)
            .bind(unit_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "find_active_event",
                source,
            })?;
        Ok(row.map(ActiveEvent::from))
    }

    /// Persist the status for one event. Returns whether a row was updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_status(&self, status: EventStatus, event_id: i64) -> Result<bool> {
        let result = sqlx::query(UPDATE_EVENT_STATUS)
            .bind(status.as_str())
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "set_event_status",
                source,
            })?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EventLookup for EventStore {
    async fn find_active_event(
        &self,
        unit_id: &str,
        at: DateTime<Utc>,
    ) -> LookupResult<Option<ActiveEvent>> {
        Ok(self.active_event(unit_id, at).await?)
    }
}

#[async_trait]
impl EventStatusService for EventStore {
    async fn set_event_status(&self, status: EventStatus, event_id: i64) -> LookupResult<()> {
        if !self.update_status(status, event_id).await? {
            debug!(event_id, status = status.as_str(), "no event row matched status update");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_into_active_event() {
        let event = ActiveEvent::from(ActiveEventRow {
            id: 7,
            name: "Spring ADS run".into(),
            location: "Lot A".into(),
            testing_type: "ADS".into(),
        });
        assert_eq!(event.id, 7);
        assert_eq!(event.location, "Lot A");
    }

    #[test]
    fn lookup_query_filters_on_assignment_window() {
        assert!(SELECT_ACTIVE_EVENT.contains("eu.start_time <= $2"));
        assert!(SELECT_ACTIVE_EVENT.contains("eu.end_time >= $2"));
        assert!(SELECT_ACTIVE_EVENT.contains("ORDER BY eu.start_time DESC"));
    }

    #[tokio::test]
    async fn lazy_pool_defers_dialing() {
        let store = EventStore::connect_lazy("postgres://telematic@127.0.0.1:1/telematic");
        assert!(matches!(store, Ok(ref store) if store.pool().size() == 0));
    }

    #[tokio::test]
    async fn lazy_pool_rejects_malformed_url() {
        let result = EventStore::connect_lazy("not a database url");
        assert!(matches!(result, Err(DataError::ConnectFailed { .. })));
    }
}
