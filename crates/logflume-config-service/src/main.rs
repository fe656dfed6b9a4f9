#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::sync::Arc;

use logflume_config_service::document::{run_reload_loop, DocumentStore};
use logflume_config_service::server;
use logflume_core::config::ConfigServiceConfig;
use logflume_core::telemetry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match ConfigServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config service startup failed: {err}");
            return;
        }
    };
    if let Err(err) = telemetry::init_tracing(&config.log_level) {
        eprintln!("failed to install tracing subscriber: {err}");
        return;
    }

    let store = Arc::new(DocumentStore::new());
    store.load_from(&config.config_file);

    let cancel = CancellationToken::new();
    let reload = tokio::spawn(run_reload_loop(
        Arc::clone(&store),
        config.config_file.clone(),
        config.reload_interval,
        cancel.clone(),
    ));

    let listener = match TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(bind = %config.bind, %err, "failed to bind config listener");
            return;
        }
    };
    info!(bind = %config.bind, file = %config.config_file.display(), "config service listening");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = server::serve(listener, store, server_cancel).await {
            error!(%err, "config server terminated");
        }
    });

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
    cancel.cancel();
    let _ = reload.await;
    let _ = server.await;
}
