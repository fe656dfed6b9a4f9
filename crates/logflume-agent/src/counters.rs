//! Process-wide agent counters.
//!
//! One value constructed at startup and shared by every pipeline task;
//! parse failures and sampling drops are normal operation and only ever
//! show up here, never as errors.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AgentCounters {
    lines_read: AtomicU64,
    parse_failures: AtomicU64,
    sampled_out: AtomicU64,
    entries_forwarded: AtomicU64,
    batches_sent: AtomicU64,
    config_parse_failures: AtomicU64,
}

impl AgentCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sampled_out(&self) {
        self.sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry_forwarded(&self) {
        self.entries_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_parse_failure(&self) {
        self.config_parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn sampled_out(&self) -> u64 {
        self.sampled_out.load(Ordering::Relaxed)
    }

    pub fn entries_forwarded(&self) -> u64 {
        self.entries_forwarded.load(Ordering::Relaxed)
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn config_parse_failures(&self) -> u64 {
        self.config_parse_failures.load(Ordering::Relaxed)
    }
}
