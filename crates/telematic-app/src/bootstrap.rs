use std::net::SocketAddr;
use std::sync::Arc;

use telematic_config::{BridgeConfig, ConfigResult};
use telematic_core::{BusConnector, Channel, EventLookup, EventStatusService};
use telematic_data::EventStore;
use telematic_telemetry::{LogFormat, LoggingConfig, Metrics};
use telematic_transport::{InfluxSink, NatsConnector};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::error::{AppError, AppResult};
use crate::registry::UnitRegistry;
use crate::supervisor::{ChannelSupervisor, ChannelWorker, SupervisorDeps, SupervisorSettings};

/// Dependencies required to bootstrap the bridge.
pub(crate) struct BootstrapDependencies {
    settings: SupervisorSettings,
    bind_addr: SocketAddr,
    connector: Arc<dyn BusConnector>,
    workers: Vec<ChannelWorker>,
    lookup: Arc<dyn EventLookup>,
    status: Arc<dyn EventStatusService>,
    registry: Arc<UnitRegistry>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl BootstrapDependencies {
    /// Construct production dependencies from an already validated configuration.
    pub(crate) fn from_config(config: &BridgeConfig) -> AppResult<Self> {
        let channels = config.selector.channels();
        let connector = NatsConnector::new(config.nats.url.as_str(), config.nats.max_reconnects)
            .with_name(client_name(&channels));

        let mut workers = Vec::with_capacity(channels.len());
        for profile in config.active_profiles() {
            let sink = InfluxSink::new(
                config.influx.url.clone(),
                config.influx.org.clone(),
                config.influx.token.clone(),
                profile.sink_bucket.clone(),
            )
            .map_err(|err| AppError::sink("influx_sink.new", err))?;
            workers.push(ChannelWorker {
                profile: profile.clone(),
                sink: Arc::new(sink),
            });
        }

        let store = Arc::new(
            EventStore::connect_lazy(&config.database_url)
                .map_err(|err| AppError::data("event_store.connect", err))?,
        );
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

        Ok(Self {
            settings: SupervisorSettings::from_config(config),
            bind_addr: config.http.bind_addr,
            connector: Arc::new(connector),
            workers,
            lookup: store.clone(),
            status: store,
            registry: Arc::new(UnitRegistry::new()),
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// Channels served by the configured workers.
    fn channels(&self) -> Vec<Channel> {
        self.workers
            .iter()
            .map(|worker| worker.profile.channel)
            .collect()
    }
}

fn client_name(channels: &[Channel]) -> String {
    let names: Vec<&str> = channels.iter().map(|channel| channel.as_str()).collect();
    format!("telematic-bridge-{}", names.join("-"))
}

/// Entry point for the bridge boot sequence.
///
/// Configuration is validated before logging starts or any connection is
/// attempted, so an invalid channel selector aborts immediately.
///
/// # Errors
///
/// Returns an error if configuration, dependency construction, or the
/// listing endpoint fails.
pub async fn run_app() -> AppResult<()> {
    start(BridgeConfig::from_env, BootstrapDependencies::from_config).await
}

/// Load configuration with `load`, then hand it to `build` and run.
pub(crate) async fn start<L, B>(load: L, build: B) -> AppResult<()>
where
    L: FnOnce() -> ConfigResult<BridgeConfig>,
    B: FnOnce(&BridgeConfig) -> AppResult<BootstrapDependencies>,
{
    let config = load().map_err(|err| AppError::config("config.load", err))?;

    let logging = LoggingConfig {
        format: LogFormat::from_name(config.log_format.as_deref()),
        ..LoggingConfig::default()
    };
    telematic_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let dependencies = build(&config)?;

    let shutdown = dependencies.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let channels = dependencies.channels();
    info!(?channels, "telematic bridge starting");

    let BootstrapDependencies {
        settings,
        bind_addr,
        connector,
        workers,
        lookup,
        status,
        registry,
        metrics,
        shutdown,
    } = dependencies;

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|err| AppError::http("http.bind", bind_addr, err))?;
    let api_state = Arc::new(ApiState::new(
        Arc::clone(&registry),
        metrics.clone(),
        channels,
    ));
    let api_task = tokio::spawn(api::serve(listener, api_state, shutdown.clone()));

    let deps = SupervisorDeps {
        connector,
        lookup,
        status,
        registry,
        metrics,
    };
    ChannelSupervisor::new(deps, workers, settings)
        .run(shutdown.clone())
        .await;

    shutdown.cancel();
    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(error = %err, "listing endpoint failed");
            return Err(AppError::http("http.serve", bind_addr, err));
        }
        Err(err) => warn!(error = %err, "listing endpoint task join failed"),
    }

    info!("telematic bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::Value;
    use telematic_config::{ChannelProfile, ConfigError, ProbeSettings};
    use telematic_core::MessageBus;
    use telematic_test_support::fixtures::{registration_payload, sample_event};
    use telematic_test_support::mocks::{
        FlakyConnector, RecordingSink, RecordingStatus, StaticLookup,
    };
    use telematic_transport::MemoryBroker;

    use super::*;
    use crate::retry::{BackoffPolicy, JitterPolicy};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn memory_dependencies(
        broker: &MemoryBroker,
        bind_addr: SocketAddr,
    ) -> anyhow::Result<BootstrapDependencies> {
        let profile = ChannelProfile {
            channel: Channel::Platform,
            subject_prefix: "platform".into(),
            unit_ids: vec!["U1".into()],
            sink_bucket: "platform-bucket".into(),
        };
        Ok(BootstrapDependencies {
            settings: SupervisorSettings {
                probe: ProbeSettings {
                    period: Duration::from_secs(60),
                    timeout: Duration::from_millis(100),
                    concurrency: 4,
                },
                refresh_period: Duration::from_secs(60),
                backoff: BackoffPolicy {
                    first: Duration::from_millis(10),
                    max: Duration::from_millis(20),
                    factor: 2.0,
                    jitter: JitterPolicy::None,
                },
            },
            bind_addr,
            connector: Arc::new(broker.connector()),
            workers: vec![ChannelWorker {
                profile,
                sink: Arc::new(RecordingSink::new()),
            }],
            lookup: Arc::new(StaticLookup::new().with_event("U1", sample_event(7))),
            status: Arc::new(RecordingStatus::new()),
            registry: Arc::new(UnitRegistry::new()),
            metrics: Metrics::new()?,
            shutdown: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn invalid_selector_fails_before_any_connection() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let connector = Arc::new(FlakyConnector::new(Arc::new(broker.connector()), 0));
        let sink = Arc::new(RecordingSink::new());
        let built = AtomicBool::new(false);
        let mut deps = memory_dependencies(&broker, SocketAddr::from(([127, 0, 0, 1], 0)))?;
        deps.connector = connector.clone();
        deps.workers[0].sink = sink.clone();

        let result = start(
            || {
                BridgeConfig::from_lookup(lookup_from(&[
                    ("TELEMATIC_CHANNEL", "INVALID"),
                    ("DATABASE_URL", "postgres://localhost/telematic"),
                ]))
            },
            |_config| {
                built.store(true, Ordering::SeqCst);
                Ok(deps)
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(AppError::Config {
                source: ConfigError::InvalidChannelSelector { .. },
                ..
            })
        ));
        assert!(!built.load(Ordering::SeqCst));
        assert_eq!(connector.attempts(), 0);
        assert_eq!(sink.connect_attempts(), 0);
        assert_eq!(broker.subscription_count("*.register_unit"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn production_dependencies_follow_selector() -> anyhow::Result<()> {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("TELEMATIC_CHANNEL", "ALL"),
            ("TELEMATIC_STREETS_BUCKET", "roads"),
            ("DATABASE_URL", "postgres://localhost/telematic"),
        ]))?;
        let deps = BootstrapDependencies::from_config(&config)?;
        assert_eq!(
            deps.channels(),
            vec![Channel::Platform, Channel::Streets, Channel::Cloud]
        );
        assert_eq!(deps.workers[1].profile.sink_bucket, "roads");
        Ok(())
    }

    #[test]
    fn client_name_lists_channels() {
        assert_eq!(
            client_name(&[Channel::Platform, Channel::Cloud]),
            "telematic-bridge-platform-cloud"
        );
    }

    #[tokio::test]
    async fn occupied_port_is_reported() -> anyhow::Result<()> {
        let holder = TcpListener::bind("127.0.0.1:0").await?;
        let addr = holder.local_addr()?;
        let broker = MemoryBroker::new();
        let result = run_app_with(memory_dependencies(&broker, addr)?).await;
        assert!(matches!(result, Err(AppError::Http { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn bridge_serves_registrations_until_shutdown() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let deps = memory_dependencies(&broker, SocketAddr::from(([127, 0, 0, 1], 0)))?;
        let shutdown = deps.shutdown.clone();
        let task = tokio::spawn(run_app_with(deps));

        for _ in 0..200 {
            if broker.subscription_count("*.register_unit") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reply = broker
            .bus()
            .request(
                "U1.register_unit",
                Bytes::from(registration_payload("U1")),
                Duration::from_secs(1),
            )
            .await?;
        let reply: Value = serde_json::from_slice(&reply)?;
        assert_eq!(reply["unit_id"], "U1");
        assert_eq!(reply["event_id"], 7);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await???;
        Ok(())
    }
}
