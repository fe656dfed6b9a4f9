//! Health and metrics endpoints on the management port.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use logflume_proto::LogEntry;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::IngestMetrics;
use crate::store::LogStore;

#[derive(Clone)]
pub struct HttpState {
    pub metrics: Arc<IngestMetrics>,
    /// Cloned inbox sender, used only to observe queue depth.
    pub inbox: mpsc::Sender<LogEntry>,
    pub store: Arc<dyn LogStore>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves the management endpoints until cancelled.
pub async fn serve(
    listener: TcpListener,
    state: HttpState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn health(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    let healthy = state.metrics.is_healthy();
    let inbox_depth = state.inbox.max_capacity() - state.inbox.capacity();

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "uptime_seconds": state.metrics.uptime_seconds(),
        "last_insert_ago_seconds": state.metrics.last_insert_ago_seconds(),
        "inbox_depth": inbox_depth,
        "store_connected": state.store.is_connected(),
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn metrics(State(state): State<HttpState>) -> Json<Value> {
    let snapshot = state.metrics.snapshot();
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn start() -> (std::net::SocketAddr, HttpState, CancellationToken) {
        let (tx, _rx) = mpsc::channel(1000);
        let state = HttpState {
            metrics: Arc::new(IngestMetrics::new()),
            inbox: tx,
            store: Arc::new(MemoryStore::new()),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serve_state = state.clone();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            serve(listener, serve_state, serve_cancel).await.unwrap();
        });
        (addr, state, cancel)
    }

    #[tokio::test]
    async fn health_reports_fresh_process_as_healthy() {
        let (addr, _state, cancel) = start().await;

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["inbox_depth"], 0);
        assert_eq!(body["store_connected"], true);
        assert!(body["last_insert_ago_seconds"].is_null());

        cancel.cancel();
    }

    #[tokio::test]
    async fn metrics_serves_counters_and_ratios() {
        let (addr, state, cancel) = start().await;
        state.metrics.record_batch_received(4, 200);
        state.metrics.record_processed();
        state.metrics.record_duplicate();

        let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["batches_received"], 1);
        assert_eq!(body["logs_received"], 4);
        assert_eq!(body["logs_processed"], 1);
        assert_eq!(body["logs_duplicate"], 1);
        assert_eq!(body["dedup_rate"], 0.25);

        cancel.cancel();
    }
}
