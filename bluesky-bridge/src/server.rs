use std::future::ready;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::health::HealthRegistry;

pub async fn index() -> &'static str {
    "bluesky bridge"
}

pub fn router(liveness: HealthRegistry, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    match metrics {
        Some(handle) => router.route("/metrics", get(move || ready(handle.render()))),
        None => router,
    }
}

/// Install the global Prometheus recorder. Only one may exist per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
