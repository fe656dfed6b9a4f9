//! Config poller: periodic version-stamped policy fetches.
//!
//! Runs on its own timer and never blocks the pipeline. A new payload is
//! parsed off-path and published through the watch channel as a whole
//! snapshot; on parse failure the previous policy stays live and only a
//! counter moves.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use logflume_core::circuit_breaker::{BreakerError, CircuitBreaker};
use logflume_core::policy::SamplingPolicy;
use logflume_core::retry::{io_error_is_transient, retry_with_backoff, RetryPolicy};
use logflume_proto::framing::{MessageStream, WireError};
use logflume_proto::{ConfigRequest, ConfigResponse};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::counters::AgentCounters;

/// Per-request deadline on the config channel.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("config service closed the connection before replying")]
    NoReply,
}

fn fetch_error_is_transient(err: &BreakerError<FetchError>) -> bool {
    match err {
        BreakerError::Open { .. } => true,
        BreakerError::Inner(FetchError::Io(io_err)) => io_error_is_transient(io_err),
        BreakerError::Inner(FetchError::Wire(WireError::Io(io_err))) => {
            io_error_is_transient(io_err)
        }
        // A frame that decodes wrongly will not fix itself by retrying.
        BreakerError::Inner(FetchError::Wire(WireError::Decode(_))) => false,
        BreakerError::Inner(FetchError::NoReply) => true,
    }
}

pub struct ConfigPoller {
    agent_id: String,
    config_url: String,
    policy_tx: watch::Sender<Arc<SamplingPolicy>>,
    counters: Arc<AgentCounters>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ConfigPoller {
    pub fn new(
        agent_id: impl Into<String>,
        config_url: impl Into<String>,
        policy_tx: watch::Sender<Arc<SamplingPolicy>>,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            config_url: config_url.into(),
            policy_tx,
            counters,
            breaker: CircuitBreaker::new("config-service", 5, Duration::from_secs(30)),
            retry: RetryPolicy::default(),
        }
    }

    /// Polls on the live `poll_interval` cadence until cancelled. The
    /// caller is expected to have run [`ConfigPoller::poll_once`] for the
    /// initial fetch already.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let interval = self.policy_tx.borrow().poll_interval;
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    self.poll_once(&cancel).await;
                }
                () = cancel.cancelled() => {
                    debug!("config poller shutting down");
                    return;
                }
            }
        }
    }

    /// One poll cycle: fetch (with backoff through the breaker) and apply.
    /// Failures are logged and swallowed; the pipeline keeps its policy.
    pub async fn poll_once(&self, cancel: &CancellationToken) {
        let current_version = self.policy_tx.borrow().version.clone();

        let result = retry_with_backoff(
            &self.retry,
            cancel,
            "poll config service",
            fetch_error_is_transient,
            || self.breaker.execute(|| self.fetch(current_version.clone())),
        )
        .await;

        match result {
            Ok(response) => self.apply(&current_version, response),
            Err(err) => {
                warn!(%err, "config poll failed, keeping current policy");
            }
        }
    }

    async fn fetch(&self, current_version: String) -> Result<ConfigResponse, FetchError> {
        let exchange = async {
            let stream = TcpStream::connect(&self.config_url).await?;
            let mut channel = MessageStream::new(stream);
            channel
                .send(&ConfigRequest {
                    agent_id: self.agent_id.clone(),
                    current_version,
                })
                .await?;
            channel
                .recv::<ConfigResponse>()
                .await?
                .ok_or(FetchError::NoReply)
        };

        tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "config request timed out"))?
    }

    fn apply(&self, current_version: &str, response: ConfigResponse) {
        if response.version == current_version || response.payload.is_empty() {
            debug!(version = %response.version, "policy unchanged");
            return;
        }

        match SamplingPolicy::from_yaml(&response.payload) {
            Ok(mut policy) => {
                // The server's version string is the opaque token agents
                // echo back; keep it rather than our own recomputation.
                policy.version = response.version.clone();
                info!(version = %response.version, "policy reloaded");
                let _ = self.policy_tx.send(Arc::new(policy));
            }
            Err(err) => {
                self.counters.record_config_parse_failure();
                warn!(version = %response.version, %err, "served policy failed to parse, keeping current");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logflume_config_service::document::DocumentStore;
    use logflume_config_service::server;
    use std::io::Write;
    use tokio::net::TcpListener;

    struct Fixture {
        poller: ConfigPoller,
        policy_rx: watch::Receiver<Arc<SamplingPolicy>>,
        counters: Arc<AgentCounters>,
        cancel: CancellationToken,
        _file: Option<tempfile::NamedTempFile>,
    }

    async fn fixture(document: Option<&[u8]>) -> Fixture {
        let store = Arc::new(DocumentStore::new());
        let file = document.map(|payload| {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(payload).unwrap();
            file.flush().unwrap();
            store.load_from(file.path());
            file
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            server::serve(listener, store, serve_cancel).await.unwrap();
        });

        let (policy_tx, policy_rx) = watch::channel(Arc::new(SamplingPolicy::default()));
        let counters = Arc::new(AgentCounters::new());
        let poller = ConfigPoller::new(
            "agent-test",
            addr.to_string(),
            policy_tx,
            Arc::clone(&counters),
        );

        Fixture {
            poller,
            policy_rx,
            counters,
            cancel,
            _file: file,
        }
    }

    #[tokio::test]
    async fn initial_poll_publishes_the_served_policy() {
        let fx = fixture(Some(
            b"agent_settings:\n  poll_interval: \"30s\"\nsampling:\n  base_rates:\n    INFO: 0.25\n",
        ))
        .await;

        fx.poller.poll_once(&fx.cancel).await;

        let policy = Arc::clone(&fx.policy_rx.borrow());
        assert_eq!(policy.base_rates["INFO"], 0.25);
        assert_eq!(policy.poll_interval, Duration::from_secs(30));
        assert_eq!(policy.version.len(), 16);

        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn unchanged_version_does_not_republish() {
        let fx = fixture(Some(b"sampling:\n  base_rates:\n    INFO: 1.0\n")).await;

        fx.poller.poll_once(&fx.cancel).await;
        let first = Arc::clone(&fx.policy_rx.borrow());

        fx.poller.poll_once(&fx.cancel).await;
        let second = Arc::clone(&fx.policy_rx.borrow());

        // Same snapshot pointer: nothing was published the second time.
        assert!(Arc::ptr_eq(&first, &second));

        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_document_keeps_previous_policy() {
        let fx = fixture(Some(b"sampling: [broken")).await;

        fx.poller.poll_once(&fx.cancel).await;

        let policy = Arc::clone(&fx.policy_rx.borrow());
        assert_eq!(policy.version, "");
        assert!(policy.base_rates.is_empty());
        assert_eq!(fx.counters.config_parse_failures(), 1);

        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn empty_service_leaves_defaults_in_place() {
        let fx = fixture(None).await;

        fx.poller.poll_once(&fx.cancel).await;

        let policy = Arc::clone(&fx.policy_rx.borrow());
        assert_eq!(policy.version, "");
        assert_eq!(*policy, SamplingPolicy::default());

        fx.cancel.cancel();
    }
}
