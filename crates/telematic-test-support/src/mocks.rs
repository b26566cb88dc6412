//! In-memory fakes for the collaborator seams.
//!
//! Each fake records the calls it receives so tests can assert on ordering and
//! arguments. Failure modes are toggled through atomics so they can change
//! while a component under test is running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use telematic_core::{
    ActiveEvent, BusConnector, BusError, BusResult, DataPoint, EventLookup, EventStatus,
    EventStatusService, LookupError, LookupResult, MessageBus, MessageStream, SinkError,
    SinkResult, SinkWriter,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lookup fake backed by a fixed unit -> event table.
#[derive(Default)]
pub struct StaticLookup {
    events: Mutex<HashMap<String, ActiveEvent>>,
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl StaticLookup {
    /// Empty lookup; every unit resolves to `None`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `unit_id` to `event`.
    #[must_use]
    pub fn with_event(self, unit_id: &str, event: ActiveEvent) -> Self {
        lock(&self.events).insert(unit_id.to_string(), event);
        self
    }

    /// Make every subsequent lookup fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Unit ids looked up so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl EventLookup for StaticLookup {
    async fn find_active_event(
        &self,
        unit_id: &str,
        _at: DateTime<Utc>,
    ) -> LookupResult<Option<ActiveEvent>> {
        lock(&self.calls).push(unit_id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(LookupError::backend(
                "find_active_event",
                "lookup unavailable",
            ));
        }
        Ok(lock(&self.events).get(unit_id).cloned())
    }
}

/// Status fake recording every update in order.
#[derive(Default)]
pub struct RecordingStatus {
    updates: Mutex<Vec<(EventStatus, i64)>>,
    fail: AtomicBool,
}

impl RecordingStatus {
    /// Fresh recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent update fail after being recorded.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// All updates received, in call order.
    #[must_use]
    pub fn updates(&self) -> Vec<(EventStatus, i64)> {
        lock(&self.updates).clone()
    }

    /// Most recent status recorded for `event_id`.
    #[must_use]
    pub fn last_status(&self, event_id: i64) -> Option<EventStatus> {
        lock(&self.updates)
            .iter()
            .rev()
            .find(|(_, id)| *id == event_id)
            .map(|(status, _)| *status)
    }

    /// Forget recorded updates.
    pub fn clear(&self) {
        lock(&self.updates).clear();
    }
}

#[async_trait]
impl EventStatusService for RecordingStatus {
    async fn set_event_status(&self, status: EventStatus, event_id: i64) -> LookupResult<()> {
        lock(&self.updates).push((status, event_id));
        if self.fail.load(Ordering::SeqCst) {
            return Err(LookupError::backend("set_event_status", "status unavailable"));
        }
        Ok(())
    }
}

/// Sink fake that fails a configurable number of connects and stores writes.
pub struct RecordingSink {
    address: String,
    connect_failures: AtomicUsize,
    connect_attempts: AtomicUsize,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    points: Mutex<Vec<DataPoint>>,
}

impl RecordingSink {
    /// Sink that connects on the first attempt.
    #[must_use]
    pub fn new() -> Self {
        Self::failing_connects(0)
    }

    /// Sink whose first `failures` connect attempts fail.
    #[must_use]
    pub fn failing_connects(failures: usize) -> Self {
        Self {
            address: "memory://sink".into(),
            connect_failures: AtomicUsize::new(failures),
            connect_attempts: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            points: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent write fail.
    pub fn set_failing_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Connect attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Points written so far.
    #[must_use]
    pub fn points(&self) -> Vec<DataPoint> {
        lock(&self.points).clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkWriter for RecordingSink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> SinkResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Connect {
                address: self.address.clone(),
                detail: "refused".into(),
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
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Write {
                bucket: point.measurement.clone(),
                detail: "rejected".into(),
            });
        }
        lock(&self.points).push(point.clone());
        Ok(())
    }
}

/// Bus whose connection has dropped.
///
/// Requests fail with `TimedOut`, the way a client that buffers requests
/// while reconnecting reports them. Subscribes and publishes fail outright.
#[derive(Default)]
pub struct DisconnectedBus {
    requests: AtomicUsize,
}

impl DisconnectedBus {
    /// New disconnected bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests attempted on this bus.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for DisconnectedBus {
    async fn subscribe(&self, subject: &str) -> BusResult<MessageStream> {
        Err(BusError::Subscribe {
            subject: subject.to_string(),
            detail: "connection closed".into(),
        })
    }

    async fn publish(&self, subject: &str, _payload: Bytes) -> BusResult<()> {
        Err(BusError::Publish {
            subject: subject.to_string(),
            detail: "connection closed".into(),
        })
    }

    async fn request(&self, subject: &str, _payload: Bytes, _timeout: Duration) -> BusResult<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(BusError::TimedOut {
            subject: subject.to_string(),
        })
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Connector that fails a configurable number of attempts before delegating.
///
/// After the failures, the next `dead` successful attempts hand out a
/// [`DisconnectedBus`] instead of a working one.
pub struct FlakyConnector {
    inner: Arc<dyn BusConnector>,
    failures: AtomicUsize,
    dead: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyConnector {
    /// Wrap `inner`, failing the first `failures` attempts.
    #[must_use]
    pub fn new(inner: Arc<dyn BusConnector>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            dead: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Hand out `count` dropped connections before any working one.
    #[must_use]
    pub fn with_dead_buses(self, count: usize) -> Self {
        self.dead.store(count, Ordering::SeqCst);
        self
    }

    /// Connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BusConnector for FlakyConnector {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Err(BusError::Connect {
                address: self.inner.address().to_string(),
                detail: "refused".into(),
            });
        }
        if take_one(&self.dead) {
            return Ok(Arc::new(DisconnectedBus::new()));
        }
        self.inner.connect().await
    }
}
