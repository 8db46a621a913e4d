use std::sync::OnceLock;

use axum::extract::Extension;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};

use crate::config::Config;
use crate::server::ServerState;

/// Get a handle to the metrics recorder, initializing it as needed.
///
/// The recorder is labelled with the client ID of the first config it is requested with.
pub fn metrics_recorder(config: &Config) -> &'static PrometheusRecorder {
    static RECORDER: OnceLock<PrometheusRecorder> = OnceLock::new();
    RECORDER.get_or_init(|| PrometheusBuilder::new().add_global_label("client_id", config.client_id.clone()).build())
}

/// Handle Prometheus metrics scraping.
pub(super) async fn prometheus_scrape(Extension(state): Extension<ServerState>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.metrics.render())
}
