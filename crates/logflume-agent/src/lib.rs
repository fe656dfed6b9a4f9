//! Collection agent pipeline.
//!
//! ```text
//!   Watched files
//!       │ (one tailer task per path)
//!       v
//!   ┌─────────────────────────┐
//!   │ Tailer → Parser → Sampler │
//!   └────────────┬────────────┘
//!                │ bounded entry channel
//!                v
//!   ┌──────────────┐     ┌──────────────┐
//!   │   Batcher    │────>│ Stream sink  │──> ingestion service
//!   └──────────────┘     └──────────────┘
//!                          ▲ acks drained by a concurrent reader
//!
//!   Config poller ──(watch channel)──> live policy snapshot
//! ```
//!
//! Channel sends are the only backpressure to the tailers; the sampler
//! reads the policy snapshot per entry and the poller swaps snapshots
//! atomically, so a reload never blocks the pipeline.

pub mod agent;
pub mod batcher;
pub mod counters;
pub mod parser;
pub mod poller;
pub mod sampler;
pub mod stream;
pub mod tailer;

pub use agent::Agent;

/// Capacity of the parsed-entry channel between tailers and the batcher.
pub const ENTRY_CHANNEL_CAPACITY: usize = 1000;

/// Agent-side failure surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("stream transport: {0}")]
    Wire(#[from] logflume_proto::framing::WireError),

    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },
}
