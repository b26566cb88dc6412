//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes counters/gauges for registration, probing, dispatch, and connectivity.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Outcome label recorded for each registration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Unit was attached to an event and answered.
    Registered,
    /// Payload could not be parsed.
    Malformed,
    /// No active event matched the unit.
    Unresolved,
    /// Lookup service failed.
    LookupFailed,
}

impl RegistrationOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Malformed => "malformed",
            Self::Unresolved => "unresolved",
            Self::LookupFailed => "lookup_failed",
        }
    }
}

/// Outcome label recorded for each liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcomeLabel {
    /// Unit replied.
    Healthy,
    /// Unit did not reply and was evicted.
    Unresponsive,
    /// Transport failed for another reason.
    Failed,
}

impl ProbeOutcomeLabel {
    const fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unresponsive => "unresponsive",
            Self::Failed => "failed",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    registrations_total: IntCounterVec,
    probes_total: IntCounterVec,
    unit_evictions_total: IntCounter,
    registered_units: IntGauge,
    live_events: IntGauge,
    connect_attempts_total: IntCounterVec,
    dispatched_messages_total: IntCounterVec,
    sink_write_failures_total: IntCounterVec,
    subscriptions_active: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Units currently present in the registry.
    pub registered_units: i64,
    /// Events marked live by the last probe cycle.
    pub live_events: i64,
    /// Telemetry subscriptions currently held by channel workers.
    pub subscriptions_active: i64,
    /// Units evicted after an unanswered probe.
    pub unit_evictions_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let registrations_total = IntCounterVec::new(
            Opts::new("registrations_total", "Unit registration messages by outcome"),
            &["outcome"],
        )?;
        let probes_total = IntCounterVec::new(
            Opts::new("probes_total", "Liveness probes by outcome"),
            &["outcome"],
        )?;
        let unit_evictions_total = IntCounter::with_opts(Opts::new(
            "unit_evictions_total",
            "Units evicted after an unanswered probe",
        ))?;
        let registered_units = IntGauge::with_opts(Opts::new(
            "registered_units",
            "Units currently registered",
        ))?;
        let live_events = IntGauge::with_opts(Opts::new(
            "live_events",
            "Events marked live by the last probe cycle",
        ))?;
        let connect_attempts_total = IntCounterVec::new(
            Opts::new(
                "connect_attempts_total",
                "Bus and sink connection attempts by target and outcome",
            ),
            &["target", "outcome"],
        )?;
        let dispatched_messages_total = IntCounterVec::new(
            Opts::new(
                "dispatched_messages_total",
                "Telemetry messages written to the sink per channel",
            ),
            &["channel"],
        )?;
        let sink_write_failures_total = IntCounterVec::new(
            Opts::new(
                "sink_write_failures_total",
                "Telemetry messages that could not be decoded or written per channel",
            ),
            &["channel"],
        )?;
        let subscriptions_active = IntGauge::with_opts(Opts::new(
            "subscriptions_active",
            "Telemetry subscriptions held by channel workers",
        ))?;

        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(probes_total.clone()))?;
        registry.register(Box::new(unit_evictions_total.clone()))?;
        registry.register(Box::new(registered_units.clone()))?;
        registry.register(Box::new(live_events.clone()))?;
        registry.register(Box::new(connect_attempts_total.clone()))?;
        registry.register(Box::new(dispatched_messages_total.clone()))?;
        registry.register(Box::new(sink_write_failures_total.clone()))?;
        registry.register(Box::new(subscriptions_active.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                registrations_total,
                probes_total,
                unit_evictions_total,
                registered_units,
                live_events,
                connect_attempts_total,
                dispatched_messages_total,
                sink_write_failures_total,
                subscriptions_active,
            }),
        })
    }

    /// Count one registration message.
    pub fn inc_registration(&self, outcome: RegistrationOutcome) {
        self.inner
            .registrations_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    /// Count one probe.
    pub fn inc_probe(&self, outcome: ProbeOutcomeLabel) {
        self.inner
            .probes_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    /// Count evicted units.
    pub fn inc_evictions(&self, count: u64) {
        self.inner.unit_evictions_total.inc_by(count);
    }

    /// Set the registered unit gauge.
    pub fn set_registered_units(&self, count: usize) {
        self.inner
            .registered_units
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Set the live event gauge.
    pub fn set_live_events(&self, count: usize) {
        self.inner
            .live_events
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Count a connection attempt.
    pub fn inc_connect_attempt(&self, target: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner
            .connect_attempts_total
            .with_label_values(&[target, outcome])
            .inc();
    }

    /// Count a telemetry message written to the sink.
    pub fn inc_dispatched(&self, channel: &str) {
        self.inner
            .dispatched_messages_total
            .with_label_values(&[channel])
            .inc();
    }

    /// Count a telemetry message that could not be delivered.
    pub fn inc_sink_failure(&self, channel: &str) {
        self.inner
            .sink_write_failures_total
            .with_label_values(&[channel])
            .inc();
    }

    /// Adjust the active subscription gauge.
    pub fn add_subscriptions(&self, delta: i64) {
        self.inner.subscriptions_active.add(delta);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registered_units: self.inner.registered_units.get(),
            live_events: self.inner.live_events.get(),
            subscriptions_active: self.inner.subscriptions_active.get(),
            unit_evictions_total: self.inner.unit_evictions_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_registration(RegistrationOutcome::Registered);
        metrics.inc_registration(RegistrationOutcome::Malformed);
        metrics.inc_probe(ProbeOutcomeLabel::Healthy);
        metrics.inc_probe(ProbeOutcomeLabel::Unresponsive);
        metrics.inc_evictions(2);
        metrics.set_registered_units(3);
        metrics.set_live_events(1);
        metrics.inc_connect_attempt("bus", true);
        metrics.inc_dispatched("platform");
        metrics.inc_sink_failure("platform");
        metrics.add_subscriptions(4);
        metrics.add_subscriptions(-1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.registered_units, 3);
        assert_eq!(snapshot.live_events, 1);
        assert_eq!(snapshot.subscriptions_active, 3);
        assert_eq!(snapshot.unit_evictions_total, 2);

        let rendered = metrics.render()?;
        assert!(rendered.contains("registrations_total"));
        assert!(rendered.contains("probes_total{outcome=\"unresponsive\"}"));
        assert!(rendered.contains("connect_attempts_total"));
        Ok(())
    }
}
