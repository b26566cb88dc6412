//! Top-level orchestration of channel workers and the control plane.
//!
//! # Design
//! - One task per configured channel: bootstrap connections, then refresh topics.
//!   A channel whose bus is lost dials a new connection after a backoff.
//! - One control plane task: registration listener and liveness prober on a
//!   shared bus connection, re-established if the registration subscription ends.
//! - All tasks share one cancellation token and are joined through a `JoinSet`.

use std::sync::Arc;
use std::time::Duration;

use telematic_config::{BridgeConfig, ChannelProfile, ProbeSettings};
use telematic_core::{BusConnector, EventLookup, EventStatusService, SinkWriter};
use telematic_telemetry::Metrics;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connect::ConnectionBootstrapper;
use crate::prober::LivenessProber;
use crate::refresher::{RefresherExit, TopicRefresher};
use crate::registration::{ListenerExit, RegistrationHandler, RegistrationListener};
use crate::registry::UnitRegistry;
use crate::retry::BackoffPolicy;

/// Label used for the control plane in logs and metrics.
pub const CONTROL_PLANE: &str = "control";

/// One channel to run, with the sink it writes into.
#[derive(Clone)]
pub struct ChannelWorker {
    /// Channel settings.
    pub profile: ChannelProfile,
    /// Sink for the channel's bucket.
    pub sink: Arc<dyn SinkWriter>,
}

/// Cadences and limits shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Liveness probe settings.
    pub probe: ProbeSettings,
    /// Topic refresh cadence.
    pub refresh_period: Duration,
    /// Connect retry policy.
    pub backoff: BackoffPolicy,
}

impl SupervisorSettings {
    /// Settings taken from a validated configuration.
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self {
            probe: config.probe,
            refresh_period: config.refresh_period,
            backoff: BackoffPolicy::from_settings(&config.retry),
        }
    }
}

/// Collaborators shared by all workers.
#[derive(Clone)]
pub struct SupervisorDeps {
    /// Bus connection factory.
    pub connector: Arc<dyn BusConnector>,
    /// Event lookup service.
    pub lookup: Arc<dyn EventLookup>,
    /// Event status service.
    pub status: Arc<dyn EventStatusService>,
    /// Shared unit registry.
    pub registry: Arc<UnitRegistry>,
    /// Metrics registry.
    pub metrics: Metrics,
}

/// Runs every channel worker plus the control plane until cancelled.
pub struct ChannelSupervisor {
    deps: SupervisorDeps,
    workers: Vec<ChannelWorker>,
    settings: SupervisorSettings,
}

impl ChannelSupervisor {
    /// Supervisor for `workers`.
    #[must_use]
    pub const fn new(
        deps: SupervisorDeps,
        workers: Vec<ChannelWorker>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            deps,
            workers,
            settings,
        }
    }

    /// Spawn all workers and wait for them to finish after `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            let channel = worker.profile.channel;
            info!(%channel, "starting channel worker");
            tasks.spawn(run_channel(
                worker,
                self.deps.clone(),
                self.settings,
                cancel.clone(),
            ));
        }
        tasks.spawn(run_control_plane(self.deps, self.settings, cancel.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "worker task failed");
            }
        }
        info!("all workers stopped");
    }
}

async fn run_channel(
    worker: ChannelWorker,
    deps: SupervisorDeps,
    settings: SupervisorSettings,
    cancel: CancellationToken,
) {
    let channel = worker.profile.channel;
    let bootstrapper = ConnectionBootstrapper::new(
        channel.as_str(),
        Arc::clone(&deps.connector),
        settings.backoff,
        deps.metrics.clone(),
        cancel.clone(),
    )
    .with_sink(Arc::clone(&worker.sink));
    let mut attempt: u32 = 0;
    loop {
        let Some(handles) = bootstrapper.ensure_connected().await else {
            info!(%channel, "channel worker cancelled before connecting");
            return;
        };

        info!(%channel, units = worker.profile.unit_ids.len(), "waiting for telemetry");
        let exit = TopicRefresher::new(
            worker.profile.clone(),
            handles.bus,
            Arc::clone(&worker.sink),
            deps.metrics.clone(),
            cancel.clone(),
        )
        .run(settings.refresh_period)
        .await;

        match exit {
            RefresherExit::Cancelled => break,
            RefresherExit::BusLost => {
                let delay = settings.backoff.next(attempt);
                attempt = attempt.saturating_add(1);
                warn!(%channel, ?delay, "channel worker lost its bus, reconnecting");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    info!(%channel, "channel worker stopped");
}

async fn run_control_plane(
    deps: SupervisorDeps,
    settings: SupervisorSettings,
    cancel: CancellationToken,
) {
    let bootstrapper = ConnectionBootstrapper::new(
        CONTROL_PLANE,
        Arc::clone(&deps.connector),
        settings.backoff,
        deps.metrics.clone(),
        cancel.clone(),
    );
    let mut attempt: u32 = 0;
    loop {
        let Some(handles) = bootstrapper.ensure_connected().await else {
            return;
        };
        let bus = handles.bus;

        let handler = Arc::new(RegistrationHandler::new(
            Arc::clone(&bus),
            Arc::clone(&deps.lookup),
            Arc::clone(&deps.status),
            Arc::clone(&deps.registry),
            deps.metrics.clone(),
        ));
        let prober = LivenessProber::new(
            Arc::clone(&bus),
            Arc::clone(&deps.registry),
            Arc::clone(&deps.status),
            deps.metrics.clone(),
            settings.probe,
        );

        let plane = cancel.child_token();
        let prober_task = tokio::spawn(prober.run(plane.clone()));
        let exit = RegistrationListener::new(handler, bus)
            .run(plane.clone())
            .await;
        plane.cancel();
        if let Err(err) = prober_task.await {
            warn!(error = %err, "prober task failed");
        }

        match exit {
            ListenerExit::Cancelled => return,
            ListenerExit::SubscriptionLost => {
                let delay = settings.backoff.next(attempt);
                attempt = attempt.saturating_add(1);
                warn!(?delay, "control plane lost its subscription, reconnecting");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::Value;

    use super::*;
    use crate::retry::JitterPolicy;
    use telematic_core::{Channel, EventStatus, MessageBus};
    use telematic_test_support::fixtures::{registration_payload, sample_event};
    use telematic_test_support::mocks::{FlakyConnector, RecordingSink, RecordingStatus, StaticLookup};
    use telematic_transport::MemoryBroker;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            probe: ProbeSettings {
                period: Duration::from_millis(200),
                timeout: Duration::from_millis(100),
                concurrency: 8,
            },
            refresh_period: Duration::from_secs(30),
            backoff: BackoffPolicy {
                first: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        }
    }

    fn worker(channel: Channel, unit: &str) -> (ChannelWorker, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::failing_connects(2));
        let profile = ChannelProfile {
            channel,
            subject_prefix: channel.as_str().to_string(),
            unit_ids: vec![unit.to_string()],
            sink_bucket: format!("{channel}-bucket"),
        };
        (
            ChannelWorker {
                profile,
                sink: sink.clone(),
            },
            sink,
        )
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn supervisor_wires_channels_and_control_plane() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let connector = Arc::new(FlakyConnector::new(Arc::new(broker.connector()), 2));
        let registry = Arc::new(UnitRegistry::new());
        let status = Arc::new(RecordingStatus::new());
        let deps = SupervisorDeps {
            connector,
            lookup: Arc::new(StaticLookup::new().with_event("U1", sample_event(7))),
            status: status.clone(),
            registry: Arc::clone(&registry),
            metrics: Metrics::new()?,
        };
        let (platform, platform_sink) = worker(Channel::Platform, "U1");
        let (streets, _streets_sink) = worker(Channel::Streets, "R1");
        let cancel = CancellationToken::new();
        let supervisor = ChannelSupervisor::new(deps, vec![platform, streets], settings());
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(
            eventually(|| {
                broker.subscription_count("*.register_unit") == 1
                    && broker.subscription_count("U1.platform.>") == 1
                    && broker.subscription_count("R1.streets.>") == 1
            })
            .await
        );

        // Unit answers probes and registers.
        let _responder = broker.spawn_responder("U1.check_status", |m| Some(m.payload.clone()));
        let client = broker.bus();
        let reply = client
            .request(
                "U1.register_unit",
                Bytes::from(registration_payload("U1")),
                Duration::from_secs(1),
            )
            .await?;
        let reply: Value = serde_json::from_slice(&reply)?;
        assert_eq!(reply["event_id"], 7);
        assert_eq!(registry.len(), 1);

        client
            .publish("U1.platform.gps", Bytes::from_static(br#"{"lat": 38.9}"#))
            .await?;
        assert!(eventually(|| platform_sink.points().len() == 1).await);

        // A probe cycle keeps the responsive unit and its event live.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(status.last_status(7), Some(EventStatus::Live));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await??;
        Ok(())
    }

    #[tokio::test]
    async fn channel_worker_redials_after_losing_its_bus() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let connector = Arc::new(
            FlakyConnector::new(Arc::new(broker.connector()), 0).with_dead_buses(1),
        );
        let deps = SupervisorDeps {
            connector: connector.clone(),
            lookup: Arc::new(StaticLookup::new()),
            status: Arc::new(RecordingStatus::new()),
            registry: Arc::new(UnitRegistry::new()),
            metrics: Metrics::new()?,
        };
        let (platform, platform_sink) = worker(Channel::Platform, "U1");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            ChannelSupervisor::new(deps, vec![platform], settings()).run(cancel.clone()),
        );

        // Whichever task drew the dead connection has to dial again.
        assert!(
            eventually(|| {
                broker.subscription_count("U1.platform.>") == 1
                    && broker.subscription_count("*.register_unit") == 1
            })
            .await
        );
        assert!(connector.attempts() >= 3);

        broker
            .bus()
            .publish("U1.platform.gps", Bytes::from_static(br#"{"lat": 38.9}"#))
            .await?;
        assert!(eventually(|| platform_sink.points().len() == 1).await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await??;
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_workers_that_never_connected() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let connector = Arc::new(FlakyConnector::new(
            Arc::new(broker.connector()),
            usize::MAX,
        ));
        let deps = SupervisorDeps {
            connector: connector.clone(),
            lookup: Arc::new(StaticLookup::new()),
            status: Arc::new(RecordingStatus::new()),
            registry: Arc::new(UnitRegistry::new()),
            metrics: Metrics::new()?,
        };
        let (platform, _) = worker(Channel::Platform, "U1");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            ChannelSupervisor::new(deps, vec![platform], settings()).run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await??;
        assert!(connector.attempts() >= 2);
        Ok(())
    }
}
