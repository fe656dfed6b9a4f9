//! Exponential backoff with jitter for outbound connections.
//!
//! Only transient failures are retried (refused/reset connections, broken
//! pipes, timeouts, exhausted resources); terminal failures surface
//! immediately. Waits honour the service-wide cancellation token so
//! shutdown never blocks on a sleeping retry loop.

use std::future::Future;
use std::io;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff parameters. `base_delay * multiplier^(attempt-1)`, capped at
/// `max_delay`, with a `jitter` fraction (±10% by default) applied on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// More patient variant used for initial connection establishment.
    pub fn connect() -> Self {
        Self {
            max_retries: 10,
            max_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Delay before the given attempt (1-based), jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut delay = self.base_delay.as_secs_f64() * exp;
        let cap = self.max_delay.as_secs_f64();
        if delay > cap {
            delay = cap;
        }
        if self.jitter > 0.0 {
            let swing: f64 = OsRng.gen_range(-1.0..1.0);
            delay += delay * self.jitter * swing;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Failure mode of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{operation} failed after {attempts} attempts: {inner}")]
    Exhausted {
        operation: String,
        attempts: u32,
        inner: E,
    },

    #[error("{operation} failed with terminal error: {inner}")]
    Terminal { operation: String, inner: E },

    #[error("{operation} cancelled during retry wait")]
    Cancelled { operation: String },
}

/// Runs `op` with exponential backoff until it succeeds, exhausts the
/// retry budget, hits a terminal error, or the token is cancelled.
///
/// `is_transient` classifies errors; anything it rejects fails fast.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(
                operation,
                attempt,
                max = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying after backoff"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        operation: operation.to_string(),
                    });
                }
            }
        }

        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt, "succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) if is_transient(&err) => {
                if attempt == policy.max_retries {
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: policy.max_retries,
                        inner: err,
                    });
                }
                attempt += 1;
            }
            Err(err) => {
                warn!(operation, %err, "terminal error, not retrying");
                return Err(RetryError::Terminal {
                    operation: operation.to_string(),
                    inner: err,
                });
            }
        }
    }
}

/// Transient/terminal split for socket-level failures, mirroring the usual
/// RPC code table: refused, reset, aborted, broken pipe, and timeouts
/// retry; bad arguments, missing targets, and permission failures do not.
pub fn io_error_is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof
    )
}
