//! Test fixtures and environment helpers.

use serde_json::{Map, Value, json};
use telematic_core::{ActiveEvent, RegisteredUnit};

/// Environment variable naming an externally managed test database.
pub const TEST_DATABASE_URL_VAR: &str = "TELEMATIC_TEST_DATABASE_URL";

/// Connection string for database integration tests, if one is configured.
#[must_use]
pub fn test_database_url() -> Option<String> {
    database_url_from(std::env::var(TEST_DATABASE_URL_VAR).ok())
}

fn database_url_from(value: Option<String>) -> Option<String> {
    value
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Event with predictable metadata derived from its id.
#[must_use]
pub fn sample_event(id: i64) -> ActiveEvent {
    ActiveEvent {
        id,
        name: format!("event-{id}"),
        location: "Lot A".into(),
        testing_type: "ADS".into(),
    }
}

/// Registry entry for `unit_id` attached to `event_id`.
#[must_use]
pub fn registered_unit(unit_id: &str, event_id: i64) -> RegisteredUnit {
    let event = sample_event(event_id);
    let mut fields = Map::new();
    fields.insert("unit_type".into(), Value::String("platform".into()));
    RegisteredUnit {
        unit_id: unit_id.to_string(),
        event_id: event.id,
        event_name: event.name,
        location: event.location,
        testing_type: event.testing_type,
        fields,
    }
}

/// Registration payload as a unit would publish it.
#[must_use]
pub fn registration_payload(unit_id: &str) -> Vec<u8> {
    json!({
        "unit_id": unit_id,
        "unit_type": "platform",
        "unit_name": format!("{unit_id} test vehicle"),
        "timestamp": 1_700_000_000_000_u64
    })
    .to_string()
    .into_bytes()
}
