//! Metrics exposition endpoint.
//!
//! Serves the current gauge state over HTTP: `GET /metrics` returns the
//! Prometheus text exposition of every registered series, `GET /health`
//! answers liveness probes for the exporter process itself.

use crate::metrics::MetricSink;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Metrics server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Serve the metrics endpoint until a shutdown signal is received.
pub async fn serve(
    addr: String,
    sink: Arc<MetricSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let app = router(sink);

    let listener = TcpListener::bind(&addr).await.map_err(|e| ServerError::Bind {
        addr: addr.clone(),
        source: e,
    })?;

    info!(%addr, "Serving metrics endpoint");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}

fn router(sink: Arc<MetricSink>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(sink)
}

async fn metrics(State(sink): State<Arc<MetricSink>>) -> impl IntoResponse {
    match sink.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler_responds_with_text_format() {
        let sink = Arc::new(MetricSink::new().unwrap());
        sink.set_up("orders_db", true);

        let response = metrics(State(sink)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(prometheus::TEXT_FORMAT)
        );
    }

    #[tokio::test]
    async fn test_health_handler() {
        assert_eq!(health().await, "ok");
    }
}
