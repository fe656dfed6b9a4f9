//! Shared building blocks for the logflume services.
//!
//! Every binary in the workspace pulls its environment configuration,
//! sampling-policy model, and resilience primitives (retry with backoff,
//! circuit breaker) from here, so the three services stay consistent about
//! how they read the environment, classify errors, and recover.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod policy;
pub mod retry;
pub mod telemetry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::ConfigError;
pub use policy::SamplingPolicy;
pub use retry::{RetryError, RetryPolicy};
