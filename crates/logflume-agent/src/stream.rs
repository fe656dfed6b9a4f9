//! Stream manager: connection establishment and ack drainage.
//!
//! The agent keeps one long-lived framed connection to the ingestion
//! service. Connecting goes through backoff and the dependency's circuit
//! breaker; once up, the write half belongs to the batcher and the read
//! half to the ack reader below. A stream error is surfaced and ends the
//! pipeline — reconnection happens on the next agent start.

use std::io;

use logflume_core::circuit_breaker::{BreakerError, CircuitBreaker};
use logflume_core::retry::{io_error_is_transient, retry_with_backoff, RetryPolicy};
use logflume_proto::framing::MessageSource;
use logflume_proto::{Ack, AckStatus};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AgentError;

/// Connects to the ingestion service with exponential backoff, each
/// attempt passing through the breaker.
pub async fn connect_with_retry(
    addr: &str,
    breaker: &CircuitBreaker,
    cancel: &CancellationToken,
) -> Result<TcpStream, AgentError> {
    let operation = format!("connect to {addr}");
    let result = retry_with_backoff(
        &RetryPolicy::connect(),
        cancel,
        &operation,
        |err: &BreakerError<io::Error>| match err {
            // An open breaker may half-open by the next attempt.
            BreakerError::Open { .. } => true,
            BreakerError::Inner(io_err) => io_error_is_transient(io_err),
        },
        || breaker.execute(|| TcpStream::connect(addr)),
    )
    .await;

    match result {
        Ok(stream) => {
            info!(%addr, "connected to ingestion service");
            Ok(stream)
        }
        Err(err) => Err(AgentError::Connect {
            target: addr.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Drains acks from the reverse direction of the stream.
pub struct AckReader {
    source: MessageSource<OwnedReadHalf>,
}

impl AckReader {
    pub fn new(source: MessageSource<OwnedReadHalf>) -> Self {
        Self { source }
    }

    /// Logs every ack until the stream closes, errors, or shutdown.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                received = self.source.recv::<Ack>() => {
                    match received {
                        Ok(Some(ack)) => match ack.status() {
                            AckStatus::Success => {
                                debug!(batch_id = ack.batch_id, message = %ack.message, "batch acknowledged");
                            }
                            AckStatus::Retry => {
                                warn!(batch_id = ack.batch_id, message = %ack.message, "receiver asked for retry");
                            }
                            AckStatus::Drop => {
                                warn!(batch_id = ack.batch_id, message = %ack.message, "receiver dropped batch");
                            }
                        },
                        Ok(None) => {
                            info!("ingestion service closed the stream");
                            return;
                        }
                        Err(err) => {
                            warn!(%err, "ack stream failed");
                            return;
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!("ack reader shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logflume_proto::framing;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_once_the_listener_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let breaker = CircuitBreaker::new("ingestion-service", 5, Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let stream = connect_with_retry(&addr, &breaker, &cancel).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn cancelled_connect_returns_promptly() {
        // Nothing listens on this address; the loop would back off forever.
        let breaker = CircuitBreaker::new("ingestion-service", 50, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = tokio::time::Instant::now();
        let result = connect_with_retry("127.0.0.1:1", &breaker, &cancel).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn ack_reader_survives_all_statuses_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (source, _sink) = framing::split(stream);
            AckReader::new(source).run(CancellationToken::new()).await;
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let (_source, mut sink) = framing::split(server_stream);
        for (batch_id, status) in [
            (1, AckStatus::Success),
            (2, AckStatus::Retry),
            (3, AckStatus::Drop),
        ] {
            let mut ack = Ack {
                batch_id,
                message: "test".to_string(),
                ..Default::default()
            };
            ack.set_status(status);
            sink.send(&ack).await.unwrap();
        }
        sink.close().await.unwrap();
        drop(sink);
        drop(_source);

        // The reader exits on clean close rather than hanging.
        tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();
    }
}
