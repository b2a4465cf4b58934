use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use mongodb::Collection;
use mongodb::bson::Document;
use redis::aio::ConnectionManager;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;

/// Shared handler state: the query-role hot-store connection and the
/// cold-store reader handle. Workers have their own connections.
#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub mongo: Collection<Document>,
}

// Middleware for request logging with a short correlation id
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request
        .uri()
        .query()
        .map(|q| format!(" {}", q))
        .unwrap_or_default();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}{}]", method, path, request_id, query);

    let response = next.run(request).await;
    let duration = start_time.elapsed();

    info!(
        "Completed {} {} [{}{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        query,
        response.status().as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(actions::health))
        .route("/stats", get(actions::get_stats))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(
    interface: &str,
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Web server stopped");
    Ok(())
}
