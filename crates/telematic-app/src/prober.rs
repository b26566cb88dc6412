//! Periodic liveness probing and event status aggregation.
//!
//! # Design
//! - Each cycle probes a registry snapshot with bounded fan-out, collects the
//!   outcomes, then applies evictions and tallies in one pass.
//! - Evictions are generation checked: a unit that re-registered while its
//!   probe was in flight keeps its entry and does not count against its event.
//! - Cycles run inline on the ticker, so two cycles never overlap.
//! - A missing reply is only a liveness signal while the bus is connected; a
//!   cycle that starts disconnected is skipped, and a timeout observed after
//!   the connection dropped counts as a transport failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use telematic_config::ProbeSettings;
use telematic_core::{BusError, EventStatus, EventStatusService, MessageBus};
use telematic_telemetry::{Metrics, ProbeOutcomeLabel};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{RegistryEntry, UnitRegistry};

/// Subject a unit answers health probes on.
#[must_use]
pub fn status_subject(unit_id: &str) -> String {
    format!("{unit_id}.check_status")
}

/// Result of probing one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The unit replied.
    Healthy,
    /// No reply before the deadline, or nobody listening.
    Unresponsive,
    /// Any other transport failure; state is left untouched.
    Failed(BusError),
}

impl ProbeOutcome {
    const fn label(&self) -> ProbeOutcomeLabel {
        match self {
            Self::Healthy => ProbeOutcomeLabel::Healthy,
            Self::Unresponsive => ProbeOutcomeLabel::Unresponsive,
            Self::Failed(_) => ProbeOutcomeLabel::Failed,
        }
    }
}

/// Per-cycle healthy-minus-unresponsive count per event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LivenessTally {
    counts: BTreeMap<i64, i64>,
}

impl LivenessTally {
    /// Count one healthy unit for `event_id`.
    pub fn record_healthy(&mut self, event_id: i64) {
        *self.counts.entry(event_id).or_insert(0) += 1;
    }

    /// Count one unresponsive unit for `event_id`.
    pub fn record_unresponsive(&mut self, event_id: i64) {
        *self.counts.entry(event_id).or_insert(0) -= 1;
    }

    /// Tally for one event, if any unit of it was counted.
    #[must_use]
    pub fn count(&self, event_id: i64) -> Option<i64> {
        self.counts.get(&event_id).copied()
    }

    /// Status derived for every counted event.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<i64, EventStatus> {
        self.counts
            .iter()
            .map(|(event_id, count)| (*event_id, EventStatus::from_tally(*count)))
            .collect()
    }
}

/// Summary of one probe cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Units probed.
    pub probed: usize,
    /// Units that replied.
    pub healthy: usize,
    /// Units removed from the registry.
    pub evicted: Vec<String>,
    /// Units whose probe failed for a transport reason.
    pub failed: usize,
    /// Status written per event.
    pub statuses: BTreeMap<i64, EventStatus>,
    /// The bus was disconnected, so nothing was probed.
    pub skipped: bool,
}

/// Probes registered units and propagates event liveness.
pub struct LivenessProber {
    bus: Arc<dyn MessageBus>,
    registry: Arc<UnitRegistry>,
    status: Arc<dyn EventStatusService>,
    metrics: Metrics,
    settings: ProbeSettings,
}

impl LivenessProber {
    /// Prober wired to its collaborators.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<UnitRegistry>,
        status: Arc<dyn EventStatusService>,
        metrics: Metrics,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            bus,
            registry,
            status,
            metrics,
            settings,
        }
    }

    async fn probe(&self, unit_id: &str) -> ProbeOutcome {
        let subject = status_subject(unit_id);
        let payload = Bytes::copy_from_slice(unit_id.as_bytes());
        match self
            .bus
            .request(&subject, payload, self.settings.timeout)
            .await
        {
            Ok(_) => ProbeOutcome::Healthy,
            Err(err) if err.is_no_reply() && self.bus.is_connected() => ProbeOutcome::Unresponsive,
            Err(err) => ProbeOutcome::Failed(err),
        }
    }

    /// Probe every registered unit once and write event statuses.
    pub async fn run_cycle(&self) -> CycleReport {
        if !self.bus.is_connected() {
            warn!(units = self.registry.len(), "bus disconnected, skipping probe cycle");
            return CycleReport {
                skipped: true,
                ..CycleReport::default()
            };
        }
        let entries = self.registry.entries();
        let outcomes: Vec<(RegistryEntry, ProbeOutcome)> = stream::iter(entries)
            .map(|entry| async move {
                let outcome = self.probe(&entry.unit.unit_id).await;
                (entry, outcome)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut report = CycleReport {
            probed: outcomes.len(),
            ..CycleReport::default()
        };
        let mut tally = LivenessTally::default();
        for (entry, outcome) in outcomes {
            self.metrics.inc_probe(outcome.label());
            let unit_id = entry.unit.unit_id;
            let event_id = entry.unit.event_id;
            match outcome {
                ProbeOutcome::Healthy => {
                    report.healthy += 1;
                    tally.record_healthy(event_id);
                }
                ProbeOutcome::Unresponsive => {
                    if self.registry.evict(&unit_id, entry.generation) {
                        info!(%unit_id, event_id, "unit did not answer probe, evicted");
                        tally.record_unresponsive(event_id);
                        report.evicted.push(unit_id);
                    } else {
                        debug!(%unit_id, "unit re-registered during probe, keeping entry");
                    }
                }
                ProbeOutcome::Failed(err) => {
                    report.failed += 1;
                    warn!(%unit_id, error = %err, "probe failed");
                }
            }
        }

        report.statuses = tally.statuses();
        for (event_id, status) in &report.statuses {
            if let Err(err) = self.status.set_event_status(*status, *event_id).await {
                warn!(event_id, status = status.as_str(), error = %err, "failed to write event status");
            }
        }

        let live = report
            .statuses
            .values()
            .filter(|status| **status == EventStatus::Live)
            .count();
        self.metrics
            .inc_evictions(u64::try_from(report.evicted.len()).unwrap_or(u64::MAX));
        self.metrics.set_live_events(live);
        self.metrics.set_registered_units(self.registry.len());
        report
    }

    /// Run a cycle every probe period until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let period = self.settings.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    debug!(
                        probed = report.probed,
                        healthy = report.healthy,
                        evicted = report.evicted.len(),
                        failed = report.failed,
                        "probe cycle complete"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use telematic_test_support::fixtures::registered_unit;
    use telematic_test_support::mocks::{DisconnectedBus, RecordingStatus};
    use telematic_transport::MemoryBroker;

    fn settings() -> ProbeSettings {
        ProbeSettings {
            period: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            concurrency: 4,
        }
    }

    fn prober(
        broker: &MemoryBroker,
        registry: &Arc<UnitRegistry>,
        status: &Arc<RecordingStatus>,
    ) -> anyhow::Result<LivenessProber> {
        Ok(LivenessProber::new(
            Arc::new(broker.bus()),
            Arc::clone(registry),
            status.clone(),
            Metrics::new()?,
            settings(),
        ))
    }

    #[test]
    fn tally_treats_zero_as_not_live() {
        let mut tally = LivenessTally::default();
        tally.record_healthy(7);
        tally.record_unresponsive(7);
        tally.record_unresponsive(9);
        tally.record_healthy(9);
        tally.record_healthy(9);
        tally.record_unresponsive(11);
        assert_eq!(tally.count(7), Some(0));
        let statuses = tally.statuses();
        assert_eq!(statuses[&7], EventStatus::NotLive);
        assert_eq!(statuses[&9], EventStatus::Live);
        assert_eq!(statuses[&11], EventStatus::NotLive);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_evicts_silent_units_and_aggregates_events() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let _u1 = broker.spawn_responder("U1.check_status", |m| Some(m.payload.clone()));
        let _u3 = broker.spawn_responder("U3.check_status", |m| Some(m.payload.clone()));
        // U2 is subscribed but never answers.
        let _u2 = broker.spawn_responder("U2.check_status", |_| None);

        let registry = Arc::new(UnitRegistry::new());
        registry.upsert(registered_unit("U1", 7));
        registry.upsert(registered_unit("U2", 7));
        registry.upsert(registered_unit("U3", 9));
        let status = Arc::new(RecordingStatus::new());

        let report = prober(&broker, &registry, &status)?.run_cycle().await;

        assert_eq!(report.probed, 3);
        assert_eq!(report.healthy, 2);
        assert_eq!(report.evicted, vec!["U2".to_string()]);
        assert_eq!(report.statuses[&7], EventStatus::NotLive);
        assert_eq!(report.statuses[&9], EventStatus::Live);
        assert_eq!(status.last_status(7), Some(EventStatus::NotLive));
        assert_eq!(status.last_status(9), Some(EventStatus::Live));
        assert!(registry.get("U2").is_none());
        assert_eq!(registry.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn no_responders_evicts_unit() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let registry = Arc::new(UnitRegistry::new());
        registry.upsert(registered_unit("U1", 7));
        let status = Arc::new(RecordingStatus::new());

        let report = prober(&broker, &registry, &status)?.run_cycle().await;
        assert_eq!(report.evicted, vec!["U1".to_string()]);
        assert!(registry.is_empty());
        assert_eq!(status.last_status(7), Some(EventStatus::NotLive));
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_bus_skips_cycle() -> anyhow::Result<()> {
        let bus = Arc::new(DisconnectedBus::new());
        let registry = Arc::new(UnitRegistry::new());
        registry.upsert(registered_unit("U1", 7));
        registry.upsert(registered_unit("U2", 9));
        let status = Arc::new(RecordingStatus::new());
        let prober = LivenessProber::new(
            bus.clone(),
            Arc::clone(&registry),
            status.clone(),
            Metrics::new()?,
            settings(),
        );

        let report = prober.run_cycle().await;
        assert!(report.skipped);
        assert!(report.evicted.is_empty());
        assert_eq!(bus.requests(), 0);
        assert_eq!(registry.len(), 2);
        assert!(status.updates().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn timeout_after_disconnect_is_a_transport_failure() -> anyhow::Result<()> {
        let registry = Arc::new(UnitRegistry::new());
        let status = Arc::new(RecordingStatus::new());
        let prober = LivenessProber::new(
            Arc::new(DisconnectedBus::new()),
            Arc::clone(&registry),
            status.clone(),
            Metrics::new()?,
            settings(),
        );

        let outcome = prober.probe("U1").await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Failed(BusError::TimedOut { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_registry_writes_nothing() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let registry = Arc::new(UnitRegistry::new());
        let status = Arc::new(RecordingStatus::new());
        let report = prober(&broker, &registry, &status)?.run_cycle().await;
        assert_eq!(report, CycleReport::default());
        assert!(status.updates().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reregistration_during_probe_is_not_evicted() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let registry = Arc::new(UnitRegistry::new());
        registry.upsert(registered_unit("U1", 7));
        let reregister = Arc::clone(&registry);
        // The unit ignores the probe but re-registers while it is in flight.
        let _responder = broker.spawn_responder("U1.check_status", move |_| {
            reregister.upsert(registered_unit("U1", 7));
            None
        });
        let status = Arc::new(RecordingStatus::new());

        let report = prober(&broker, &registry, &status)?.run_cycle().await;
        assert!(report.evicted.is_empty());
        assert_eq!(registry.len(), 1);
        assert!(status.updates().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn run_probes_on_each_period() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let registry = Arc::new(UnitRegistry::new());
        registry.upsert(registered_unit("U1", 7));
        let status = Arc::new(RecordingStatus::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(prober(&broker, &registry, &status)?.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(registry.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        task.await?;
        Ok(())
    }
}
