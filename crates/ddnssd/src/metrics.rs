//! Metrics exposition endpoint
//!
//! Serves the core metrics registry in Prometheus text format on port 9218
//! when metrics are enabled.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tracing::{error, info};

/// Port the metrics endpoint listens on
const METRICS_PORT: u16 = 9218;

async fn metrics_handler() -> Result<String, StatusCode> {
    ddnssd_core::metrics::gather_metrics().map_err(|e| {
        error!(error = %e, "failed to gather metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Serve `GET /metrics` until the task is aborted.
pub async fn serve() -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", METRICS_PORT)).await?;
    info!(port = METRICS_PORT, "metrics endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
