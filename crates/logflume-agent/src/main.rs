#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use logflume_agent::Agent;
use logflume_core::config::AgentConfig;
use logflume_core::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("agent startup failed: {err}");
            return;
        }
    };
    if let Err(err) = telemetry::init_tracing(&config.log_level) {
        eprintln!("failed to install tracing subscriber: {err}");
        return;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        signal_cancel.cancel();
    });

    info!(agent_id = %config.agent_id, "starting agent");
    if let Err(err) = Agent::new(config).run(cancel).await {
        error!(%err, "agent terminated");
    }
}
