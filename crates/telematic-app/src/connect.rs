//! Bus and sink connection bootstrap with retry.
//!
//! # Design
//! - A connection that already succeeded is kept while the other is retried.
//! - There is no attempt limit; only cancellation ends the loop early.
//! - Failures log at `warn`, successes at `info`.

use std::sync::Arc;

use telematic_core::{BusConnector, MessageBus, SinkWriter};
use telematic_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::retry::BackoffPolicy;

/// Connections a worker needs to run.
#[derive(Clone)]
pub struct ConnectedHandles {
    /// Connected bus.
    pub bus: Arc<dyn MessageBus>,
    /// Connected sink, when the bootstrapper manages one.
    pub sink: Option<Arc<dyn SinkWriter>>,
}

/// Establishes a bus connection and, optionally, a sink connection.
pub struct ConnectionBootstrapper {
    label: String,
    connector: Arc<dyn BusConnector>,
    sink: Option<Arc<dyn SinkWriter>>,
    backoff: BackoffPolicy,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl ConnectionBootstrapper {
    /// Bootstrapper for `label` (a channel name or `control`).
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        connector: Arc<dyn BusConnector>,
        backoff: BackoffPolicy,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            label: label.into(),
            connector,
            sink: None,
            backoff,
            metrics,
            cancel,
        }
    }

    /// Also require `sink` to be connected.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SinkWriter>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Loop until every managed connection is up.
    ///
    /// Returns `None` only when the cancellation token fires first.
    pub async fn ensure_connected(&self) -> Option<ConnectedHandles> {
        let mut bus: Option<Arc<dyn MessageBus>> = None;
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if bus.is_none() {
                bus = self.connect_bus().await;
            }
            let sink_ready = match &self.sink {
                Some(sink) => sink.is_connected() || self.connect_sink(sink.as_ref()).await,
                None => true,
            };
            if let (Some(bus), true) = (&bus, sink_ready) {
                return Some(ConnectedHandles {
                    bus: Arc::clone(bus),
                    sink: self.sink.clone(),
                });
            }

            let delay = self.backoff.next(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_bus(&self) -> Option<Arc<dyn MessageBus>> {
        let address = self.connector.address();
        match self.connector.connect().await {
            Ok(bus) => {
                self.metrics.inc_connect_attempt("bus", true);
                info!(worker = %self.label, %address, "bus connection established");
                Some(bus)
            }
            Err(err) => {
                self.metrics.inc_connect_attempt("bus", false);
                warn!(worker = %self.label, %address, error = %err, "bus connection failed, retrying");
                None
            }
        }
    }

    async fn connect_sink(&self, sink: &dyn SinkWriter) -> bool {
        let address = sink.address();
        match sink.connect().await {
            Ok(()) => {
                self.metrics.inc_connect_attempt("sink", true);
                info!(worker = %self.label, %address, "sink connection established");
                true
            }
            Err(err) => {
                self.metrics.inc_connect_attempt("sink", false);
                warn!(worker = %self.label, %address, error = %err, "sink connection failed, retrying");
                false
            }
        }
    }
}
