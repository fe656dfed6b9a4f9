//! Stateless per-entry sampling against the live policy snapshot.

use std::sync::Arc;

use logflume_core::policy::SamplingPolicy;
use logflume_proto::LogEntry;
use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::watch;

/// Decides, per entry, whether it survives sampling.
///
/// The policy snapshot is read through a watch channel: `borrow` takes a
/// cheap reference at the start of each decision and the draw happens
/// outside any lock, so a concurrent reload never blocks an entry. Draws
/// come from the OS CSPRNG, so sampling cannot be predicted from external
/// state.
#[derive(Clone)]
pub struct Sampler {
    policy: watch::Receiver<Arc<SamplingPolicy>>,
}

impl Sampler {
    pub fn new(policy: watch::Receiver<Arc<SamplingPolicy>>) -> Self {
        Self { policy }
    }

    pub fn should_keep(&self, entry: &LogEntry) -> bool {
        let policy = Arc::clone(&self.policy.borrow());
        let rate = policy.rate_for(&entry.level, &entry.message);

        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        OsRng.gen::<f64>() < rate
    }
}
