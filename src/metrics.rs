//! Prometheus metrics exporter, enabled when `METRICS_PORT` is set.

use axum::{Router, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

/// Install the Prometheus recorder. Counters recorded before this is called
/// are dropped, so the serve command runs it before spawning any worker.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Serve `/metrics` for scraping. Runs as its own task for the life of the
/// process.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) {
    let app = Router::new().route(
        "/metrics",
        get(move || async move { handle.render().into_response() }),
    );

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    info!("Metrics server listening on http://0.0.0.0:{}/metrics", port);
    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server stopped: {}", e);
    }
}
