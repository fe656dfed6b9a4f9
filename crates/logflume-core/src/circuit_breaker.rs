//! Per-dependency circuit breaker.
//!
//! Tracks consecutive failures against a named dependency. CLOSED is
//! normal operation; reaching the failure threshold opens the circuit,
//! which fast-fails callers until the reset timeout elapses; HALF_OPEN
//! admits a bounded probe quota, and a full run of probe successes closes
//! the circuit while any probe failure reopens it.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Call rejected or failed by the breaker.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_successes: u32,
    probes_in_flight: u32,
}

/// Named circuit breaker guarding one outbound dependency.
///
/// State lives behind a plain mutex taken only around the pre/post
/// bookkeeping, never across the guarded call itself.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    probe_quota: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures,
            reset_timeout,
            probe_quota: 3,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_successes: 0,
                probes_in_flight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Runs `op` through the breaker.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.before_request()?;
        let outcome = op().await;
        self.after_request(outcome.is_ok());
        outcome.map_err(BreakerError::Inner)
    }

    fn before_request<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.last_failure.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.reset_timeout) {
                    info!(breaker = %self.name, "transitioning to HALF_OPEN");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                    inner.probes_in_flight = 1;
                    Ok(())
                } else {
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight >= self.probe_quota {
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                    });
                }
                inner.probes_in_flight += 1;
                Ok(())
            }
        }
    }

    fn after_request(&self, success: bool) {
        let mut inner = self.lock();
        if success {
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                }
                CircuitState::HalfOpen => {
                    inner.probe_successes += 1;
                    if inner.probe_successes >= self.probe_quota {
                        info!(breaker = %self.name, "probes succeeded, closing circuit");
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                        inner.probe_successes = 0;
                        inner.probes_in_flight = 0;
                    }
                }
                CircuitState::Open => {}
            }
        } else {
            inner.consecutive_failures += 1;
            inner.last_failure = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    if inner.consecutive_failures >= self.max_failures {
                        warn!(
                            breaker = %self.name,
                            failures = inner.consecutive_failures,
                            "failure threshold reached, opening circuit"
                        );
                        inner.state = CircuitState::Open;
                    }
                }
                CircuitState::HalfOpen => {
                    warn!(breaker = %self.name, "probe failed, reopening circuit");
                    inner.state = CircuitState::Open;
                    inner.probe_successes = 0;
                    inner.probes_in_flight = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Bookkeeping never panics while holding the lock.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("dep", 3, Duration::from_secs(60));
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // While open, calls are rejected without running the operation.
        let result = breaker
            .execute(|| async { Ok::<_, &'static str>(()) })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new("dep", 3, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.consecutive_failures(), 0);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_closes_after_probe_successes() {
        let breaker = CircuitBreaker::new("dep", 1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        // First probe moves the breaker to HALF_OPEN; a full quota of
        // successes closes it.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let breaker = CircuitBreaker::new("dep", 1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
