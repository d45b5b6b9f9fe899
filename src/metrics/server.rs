//! HTTP exposition of the metrics registry

use crate::metrics::MetricsRegistry;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Router exposing `/metrics` and `/health`
pub fn router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(|| async { "ok" }))
        .with_state(registry)
}

async fn render_metrics(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], registry.render())
}

/// Serves the metrics router until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<MetricsRegistry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Metrics endpoint listening on http://{}/metrics", addr);
    }
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}
