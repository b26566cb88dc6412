//! Read-only HTTP surface: registered units, health, and metrics.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use telematic_core::{Channel, RegisteredUnit};
use telematic_telemetry::{Metrics, MetricsSnapshot, build_sha};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::UnitRegistry;

/// Shared state behind the HTTP handlers.
pub struct ApiState {
    registry: Arc<UnitRegistry>,
    metrics: Metrics,
    channels: Vec<Channel>,
}

impl ApiState {
    /// State exposing `registry` and `metrics`.
    #[must_use]
    pub const fn new(registry: Arc<UnitRegistry>, metrics: Metrics, channels: Vec<Channel>) -> Self {
        Self {
            registry,
            metrics,
            channels,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) build: &'static str,
    pub(crate) channels: Vec<Channel>,
    pub(crate) metrics: MetricsSnapshot,
}

/// Router with every read-only endpoint mounted.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/registeredUnits", get(registered_units))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve `router` on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the server terminates unexpectedly.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    cancel: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listing endpoint ready");
    }
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

pub(crate) async fn registered_units(
    State(state): State<Arc<ApiState>>,
) -> Json<Vec<RegisteredUnit>> {
    Json(state.registry.snapshot())
}

pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        build: build_sha(),
        channels: state.channels.clone(),
        metrics: state.metrics.snapshot(),
    })
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Response {
    let (status, body) = match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render metrics".to_string(),
            )
        }
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
