//! The operational HTTP server of the chainer process.
//!
//! Serves Prometheus metrics on `/metrics` and the chainer's engine state on `/health`.

mod prom;

use anyhow::Result;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::{routing::get, AddExtensionLayer, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::engine::EngineState;

pub use prom::metrics_recorder;

/// The state shared by all request handlers.
#[derive(Clone)]
pub struct ServerState {
    metrics: PrometheusHandle,
    engine_state: watch::Receiver<EngineState>,
}

impl ServerState {
    pub fn new(metrics: PrometheusHandle, engine_state: watch::Receiver<EngineState>) -> Self {
        Self { metrics, engine_state }
    }
}

/// Spawn the HTTP server, which runs until the shutdown channel fires.
pub fn spawn_server(config: &Config, engine_state: watch::Receiver<EngineState>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let state = ServerState::new(metrics_recorder(config).handle(), engine_state);
    let app = Router::new()
        .route("/metrics", get(prom::prometheus_scrape))
        .route("/health", get(health))
        .layer(AddExtensionLayer::new(state));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.metrics_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!(port = config.metrics_port, "server is listening at 0.0.0.0 for /metrics and /health");
    tokio::spawn(server.map_err(anyhow::Error::from))
}

/// Report the engine state, healthy only while the engine is running or paused.
async fn health(Extension(state): Extension<ServerState>) -> (StatusCode, String) {
    let engine_state = *state.engine_state.borrow();
    let status = match engine_state {
        EngineState::Running | EngineState::Paused => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, engine_state.to_string())
}
