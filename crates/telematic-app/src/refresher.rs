//! Topic refresh and telemetry dispatch for one channel.
//!
//! # Design
//! - The desired subject set is derived from the channel allowlist on every tick.
//! - One dispatcher task per subject; a subject is re-subscribed only when its
//!   dispatcher has finished.
//! - Dispatch failures are logged and counted, never fatal.
//! - A disconnected bus with no live dispatcher ends the run so the caller can
//!   dial a fresh connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use telematic_config::ChannelProfile;
use telematic_core::{DataPoint, InboundMessage, MessageBus, MessageStream, SinkWriter};
use telematic_telemetry::Metrics;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subjects touched by one refresh pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Subjects that received a new dispatcher.
    pub created: Vec<String>,
    /// Subjects whose subscription failed.
    pub failed: Vec<String>,
}

/// Why a refresher stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherExit {
    /// Shutdown was requested.
    Cancelled,
    /// The bus connection is gone and every dispatcher has ended.
    BusLost,
}

/// Maintains one dispatcher per allowlisted unit subject.
pub struct TopicRefresher {
    profile: ChannelProfile,
    bus: Arc<dyn MessageBus>,
    sink: Arc<dyn SinkWriter>,
    metrics: Metrics,
    cancel: CancellationToken,
    dispatch: CancellationToken,
    dispatchers: HashMap<String, JoinHandle<()>>,
}

impl TopicRefresher {
    /// Refresher for one channel.
    #[must_use]
    pub fn new(
        profile: ChannelProfile,
        bus: Arc<dyn MessageBus>,
        sink: Arc<dyn SinkWriter>,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            profile,
            bus,
            sink,
            metrics,
            dispatch: cancel.child_token(),
            cancel,
            dispatchers: HashMap::new(),
        }
    }

    /// Subjects this channel should be subscribed to.
    #[must_use]
    pub fn desired_subjects(&self) -> Vec<String> {
        self.profile
            .unit_ids
            .iter()
            .map(|unit_id| self.profile.telemetry_subject(unit_id))
            .collect()
    }

    /// Subjects with a running dispatcher.
    #[must_use]
    pub fn active_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .dispatchers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(subject, _)| subject.clone())
            .collect();
        subjects.sort();
        subjects
    }

    /// Subscribe every desired subject that lacks a running dispatcher.
    pub async fn refresh_once(&mut self) -> RefreshReport {
        let mut report = RefreshReport::default();
        for subject in self.desired_subjects() {
            if self
                .dispatchers
                .get(&subject)
                .is_some_and(|handle| !handle.is_finished())
            {
                continue;
            }
            match self.bus.subscribe(&subject).await {
                Ok(stream) => {
                    let dispatcher = Dispatcher {
                        profile: self.profile.clone(),
                        sink: Arc::clone(&self.sink),
                        metrics: self.metrics.clone(),
                    };
                    let cancel = self.dispatch.clone();
                    self.metrics.add_subscriptions(1);
                    let metrics = self.metrics.clone();
                    let handle = tokio::spawn(async move {
                        dispatcher.run(stream, cancel).await;
                        metrics.add_subscriptions(-1);
                    });
                    info!(channel = %self.profile.channel, %subject, "dispatcher created");
                    self.dispatchers.insert(subject.clone(), handle);
                    report.created.push(subject);
                }
                Err(err) => {
                    warn!(channel = %self.profile.channel, %subject, error = %err, "subscription failed");
                    report.failed.push(subject);
                }
            }
        }
        report
    }

    /// Refresh immediately, then every `period`, until cancelled or the bus is lost.
    pub async fn run(mut self, period: Duration) -> RefresherExit {
        let mut ticker = tokio::time::interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let exit = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break RefresherExit::Cancelled,
                _ = ticker.tick() => {
                    if self.bus_lost() {
                        warn!(channel = %self.profile.channel, "bus connection lost");
                        break RefresherExit::BusLost;
                    }
                    self.reconnect_sink_if_needed().await;
                    let report = self.refresh_once().await;
                    debug!(
                        channel = %self.profile.channel,
                        created = report.created.len(),
                        failed = report.failed.len(),
                        "topic refresh complete"
                    );
                }
            }
        };
        self.shutdown().await;
        exit
    }

    /// Client-side reconnects keep subscriptions alive, so only a bus that is
    /// down with nothing left running counts as lost.
    fn bus_lost(&self) -> bool {
        !self.bus.is_connected() && self.active_subjects().is_empty()
    }

    async fn reconnect_sink_if_needed(&self) {
        if self.sink.is_connected() {
            return;
        }
        match self.sink.connect().await {
            Ok(()) => info!(channel = %self.profile.channel, "sink connection restored"),
            Err(err) => warn!(channel = %self.profile.channel, error = %err, "sink still unavailable"),
        }
    }

    async fn shutdown(&mut self) {
        self.dispatch.cancel();
        for (_, handle) in self.dispatchers.drain() {
            if let Err(err) = handle.await {
                warn!(channel = %self.profile.channel, error = %err, "dispatcher join failed");
            }
        }
    }
}

struct Dispatcher {
    profile: ChannelProfile,
    sink: Arc<dyn SinkWriter>,
    metrics: Metrics,
}

impl Dispatcher {
    async fn run(&self, mut stream: MessageStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(message) => self.dispatch(&message).await,
                    None => {
                        warn!(channel = %self.profile.channel, "telemetry subscription closed");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: &InboundMessage) {
        let channel = self.profile.channel.as_str();
        let Some(point) = self.decode(message) else {
            self.metrics.inc_sink_failure(channel);
            return;
        };
        match self.sink.write(&point).await {
            Ok(()) => self.metrics.inc_dispatched(channel),
            Err(err) => {
                self.metrics.inc_sink_failure(channel);
                warn!(channel, subject = %message.subject, error = %err, "sink write failed");
            }
        }
    }

    fn decode(&self, message: &InboundMessage) -> Option<DataPoint> {
        let document: Value = match serde_json::from_slice(&message.payload) {
            Ok(document) => document,
            Err(err) => {
                warn!(channel = %self.profile.channel, subject = %message.subject, error = %err, "telemetry payload is not json");
                return None;
            }
        };
        let unit_id = message.subject_unit().unwrap_or_default().to_string();
        let topic = topic_name(&message.subject, &unit_id, &self.profile.subject_prefix);
        let tags = BTreeMap::from([
            ("unit_id".to_string(), unit_id),
            ("topic_name".to_string(), topic),
            ("channel".to_string(), self.profile.channel.as_str().to_string()),
        ]);
        let point = DataPoint::from_json(
            self.profile.sink_bucket.clone(),
            tags,
            &document,
            Utc::now().timestamp_millis(),
        );
        if point.is_none() {
            warn!(channel = %self.profile.channel, subject = %message.subject, "telemetry payload had no writable fields");
        }
        point
    }
}

/// Part of the subject after `<unit_id>.<prefix>.`.
fn topic_name(subject: &str, unit_id: &str, prefix: &str) -> String {
    subject
        .strip_prefix(unit_id)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_prefix(prefix))
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(subject)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use telematic_core::{Channel, FieldValue};
    use telematic_test_support::mocks::{DisconnectedBus, RecordingSink};
    use telematic_transport::MemoryBroker;

    fn profile(units: &[&str]) -> ChannelProfile {
        ChannelProfile {
            channel: Channel::Platform,
            subject_prefix: "platform".into(),
            unit_ids: units.iter().map(|unit| (*unit).to_string()).collect(),
            sink_bucket: "platform-bucket".into(),
        }
    }

    async fn connected_sink() -> anyhow::Result<Arc<RecordingSink>> {
        let sink = Arc::new(RecordingSink::new());
        sink.connect().await?;
        Ok(sink)
    }

    async fn wait_for_points(sink: &RecordingSink, count: usize) {
        for _ in 0..100 {
            if sink.points().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn topic_name_strips_unit_and_prefix() {
        assert_eq!(topic_name("U1.platform.imu.accel", "U1", "platform"), "imu.accel");
        assert_eq!(topic_name("U1.other.imu", "U1", "platform"), "U1.other.imu");
    }

    #[tokio::test]
    async fn refresh_is_idempotent_for_live_dispatchers() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let mut refresher = TopicRefresher::new(
            profile(&["U1", "U2"]),
            Arc::new(broker.bus()),
            connected_sink().await?,
            Metrics::new()?,
            CancellationToken::new(),
        );

        let first = refresher.refresh_once().await;
        assert_eq!(first.created, vec!["U1.platform.>", "U2.platform.>"]);
        let second = refresher.refresh_once().await;
        assert!(second.created.is_empty());
        assert_eq!(broker.subscription_count("U1.platform.>"), 1);
        assert_eq!(refresher.active_subjects().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn subscription_failure_does_not_abort_refresh() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let bus = broker.bus();
        bus.set_connected(false);
        let mut refresher = TopicRefresher::new(
            profile(&["U1", "U2"]),
            Arc::new(bus.clone()),
            connected_sink().await?,
            Metrics::new()?,
            CancellationToken::new(),
        );

        let report = refresher.refresh_once().await;
        assert_eq!(report.failed.len(), 2);

        bus.set_connected(true);
        let report = refresher.refresh_once().await;
        assert_eq!(report.created.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn dispatcher_writes_flattened_points() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let bus = broker.bus();
        let sink = connected_sink().await?;
        let metrics = Metrics::new()?;
        let mut refresher = TopicRefresher::new(
            profile(&["U1"]),
            Arc::new(bus.clone()),
            sink.clone(),
            metrics.clone(),
            CancellationToken::new(),
        );
        refresher.refresh_once().await;

        bus.publish(
            "U1.platform.imu",
            Bytes::from_static(br#"{"accel": {"x": 1.5, "y": 2}, "ok": true}"#),
        )
        .await?;
        bus.publish("U1.platform.imu", Bytes::from_static(b"not json"))
            .await?;
        wait_for_points(&sink, 1).await;

        let points = sink.points();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement, "platform-bucket");
        assert_eq!(point.tags.get("unit_id").map(String::as_str), Some("U1"));
        assert_eq!(point.tags.get("topic_name").map(String::as_str), Some("imu"));
        assert_eq!(point.fields.get("accel.x"), Some(&FieldValue::Float(1.5)));
        assert_eq!(point.fields.get("ok"), Some(&FieldValue::Boolean(true)));
        assert!(metrics.render()?.contains("sink_write_failures_total"));
        Ok(())
    }

    #[tokio::test]
    async fn sink_write_failure_keeps_dispatcher_running() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let bus = broker.bus();
        let sink = connected_sink().await?;
        let mut refresher = TopicRefresher::new(
            profile(&["U1"]),
            Arc::new(bus.clone()),
            sink.clone(),
            Metrics::new()?,
            CancellationToken::new(),
        );
        refresher.refresh_once().await;

        sink.set_failing_writes(true);
        bus.publish("U1.platform.gps", Bytes::from_static(br#"{"lat": 1.0}"#))
            .await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.set_failing_writes(false);
        bus.publish("U1.platform.gps", Bytes::from_static(br#"{"lat": 2.0}"#))
            .await?;
        wait_for_points(&sink, 1).await;

        assert_eq!(sink.points().len(), 1);
        assert_eq!(refresher.active_subjects(), vec!["U1.platform.>"]);
        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();
        let refresher = TopicRefresher::new(
            profile(&["U1"]),
            Arc::new(broker.bus()),
            connected_sink().await?,
            Metrics::new()?,
            cancel.clone(),
        );
        let task = tokio::spawn(refresher.run(Duration::from_secs(30)));
        for _ in 0..100 {
            if broker.subscription_count("U1.platform.>") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.subscription_count("U1.platform.>"), 1);
        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await??;
        assert_eq!(exit, RefresherExit::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn run_reports_lost_bus() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let refresher = TopicRefresher::new(
            profile(&["U1"]),
            Arc::new(DisconnectedBus::new()),
            connected_sink().await?,
            Metrics::new()?,
            cancel.clone(),
        );
        let exit = tokio::time::timeout(
            Duration::from_secs(1),
            refresher.run(Duration::from_secs(30)),
        )
        .await?;
        assert_eq!(exit, RefresherExit::BusLost);
        assert!(!cancel.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_with_live_dispatchers_keeps_running() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let bus = broker.bus();
        let cancel = CancellationToken::new();
        let refresher = TopicRefresher::new(
            profile(&["U1"]),
            Arc::new(bus.clone()),
            connected_sink().await?,
            Metrics::new()?,
            cancel.clone(),
        );
        let task = tokio::spawn(refresher.run(Duration::from_millis(20)));
        for _ in 0..100 {
            if broker.subscription_count("U1.platform.>") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bus.set_connected(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await??;
        assert_eq!(exit, RefresherExit::Cancelled);
        Ok(())
    }
}
