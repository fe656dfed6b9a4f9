#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::sync::Arc;

use logflume_core::config::IngestionConfig;
use logflume_core::telemetry;
use logflume_ingestion::dedup::DedupCache;
use logflume_ingestion::http::{self, HttpState};
use logflume_ingestion::metrics::IngestMetrics;
use logflume_ingestion::receiver::{self, IngestState};
use logflume_ingestion::store::{HttpStore, LogStore};
use logflume_ingestion::writer::Writer;
use logflume_ingestion::INBOX_CAPACITY;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match IngestionConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ingestion startup failed: {err}");
            return;
        }
    };
    if let Err(err) = telemetry::init_tracing(&config.log_level) {
        eprintln!("failed to install tracing subscriber: {err}");
        return;
    }

    let metrics = Arc::new(IngestMetrics::new());
    let store: Arc<dyn LogStore> = Arc::new(HttpStore::new(config.store_url.clone()));
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let cancel = CancellationToken::new();

    let writer = Writer::new(
        inbox_rx,
        Arc::clone(&store),
        config.store_table.clone(),
        Arc::clone(&metrics),
        cancel.clone(),
    );
    let writer_task = tokio::spawn(writer.run());

    let stream_listener = match TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(bind = %config.bind, %err, "failed to bind stream listener");
            return;
        }
    };
    info!(bind = %config.bind, store = %config.store_url, "ingestion service listening");

    let ingest_state = IngestState {
        metrics: Arc::clone(&metrics),
        dedup: DedupCache::new(config.dedup_window),
        inbox: inbox_tx.clone(),
    };
    let receiver_cancel = cancel.clone();
    let receiver_task = tokio::spawn(async move {
        if let Err(err) = receiver::serve(stream_listener, ingest_state, receiver_cancel).await {
            error!(%err, "stream receiver terminated");
        }
    });

    let health_bind = format!("0.0.0.0:{}", config.health_port);
    let http_task = match TcpListener::bind(&health_bind).await {
        Ok(listener) => {
            info!(bind = %health_bind, "health/metrics endpoints up");
            let state = HttpState {
                metrics: Arc::clone(&metrics),
                inbox: inbox_tx.clone(),
                store: Arc::clone(&store),
            };
            let http_cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = http::serve(listener, state, http_cancel).await {
                    error!(%err, "management server terminated");
                }
            }))
        }
        Err(err) => {
            error!(bind = %health_bind, %err, "failed to bind management port");
            None
        }
    };

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
    cancel.cancel();
    // Drop our inbox handle so the writer sees closure once receivers stop.
    drop(inbox_tx);

    let _ = receiver_task.await;
    let _ = writer_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
    info!("ingestion service stopped");
}
