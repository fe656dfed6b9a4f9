//! Process-wide ingestion counters and derived ratios.
//!
//! One `IngestMetrics` value is constructed at startup and passed to every
//! pipeline context; there are no ambient globals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Window after which a process with no successful insert is unhealthy.
pub const HEALTHY_INSERT_WINDOW_SECS: u64 = 120;

#[derive(Debug)]
pub struct IngestMetrics {
    started_at: Instant,
    batches_received: AtomicU64,
    logs_received: AtomicU64,
    logs_processed: AtomicU64,
    logs_duplicate: AtomicU64,
    logs_decompress_failed: AtomicU64,
    logs_inserted: AtomicU64,
    inserts_failed: AtomicU64,
    bytes_received: AtomicU64,
    bytes_decompressed: AtomicU64,
    last_insert: Mutex<Option<Instant>>,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            batches_received: AtomicU64::new(0),
            logs_received: AtomicU64::new(0),
            logs_processed: AtomicU64::new(0),
            logs_duplicate: AtomicU64::new(0),
            logs_decompress_failed: AtomicU64::new(0),
            logs_inserted: AtomicU64::new(0),
            inserts_failed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_decompressed: AtomicU64::new(0),
            last_insert: Mutex::new(None),
        }
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch_received(&self, logs: usize, bytes: usize) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.logs_received.fetch_add(logs as u64, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_decompressed(&self, bytes: usize) {
        self.bytes_decompressed
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_decompress_failure(&self, logs: usize) {
        self.logs_decompress_failed
            .fetch_add(logs as u64, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.logs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.logs_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert_success(&self, rows: usize) {
        self.logs_inserted.fetch_add(rows as u64, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_insert.lock() {
            *guard = Some(Instant::now());
        }
    }

    pub fn record_insert_failure(&self) {
        self.inserts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn logs_duplicate(&self) -> u64 {
        self.logs_duplicate.load(Ordering::Relaxed)
    }

    pub fn logs_inserted(&self) -> u64 {
        self.logs_inserted.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn last_insert_ago_seconds(&self) -> Option<u64> {
        self.last_insert
            .lock()
            .ok()
            .and_then(|guard| guard.map(|at| at.elapsed().as_secs()))
    }

    /// Healthy iff a successful insert happened within the last two
    /// minutes; a fresh process stays healthy until that grace elapses.
    pub fn is_healthy(&self) -> bool {
        match self.last_insert_ago_seconds() {
            Some(ago) => ago < HEALTHY_INSERT_WINDOW_SECS,
            None => self.uptime_seconds() < HEALTHY_INSERT_WINDOW_SECS,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let logs_received = self.logs_received.load(Ordering::Relaxed);
        let logs_processed = self.logs_processed.load(Ordering::Relaxed);
        let logs_duplicate = self.logs_duplicate.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);
        let bytes_decompressed = self.bytes_decompressed.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs_f64();

        let compression_ratio = if bytes_received > 0 && bytes_decompressed > 0 {
            bytes_decompressed as f64 / bytes_received as f64
        } else {
            0.0
        };
        let logs_per_second = if uptime > 0.0 {
            logs_processed as f64 / uptime
        } else {
            0.0
        };
        let dedup_rate = if logs_received > 0 {
            logs_duplicate as f64 / logs_received as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            logs_received,
            logs_processed,
            logs_duplicate,
            logs_decompress_failed: self.logs_decompress_failed.load(Ordering::Relaxed),
            logs_inserted: self.logs_inserted.load(Ordering::Relaxed),
            inserts_failed: self.inserts_failed.load(Ordering::Relaxed),
            bytes_received,
            bytes_decompressed,
            compression_ratio,
            logs_per_second,
            dedup_rate,
        }
    }
}

/// Point-in-time counter values plus derived ratios, served by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub logs_received: u64,
    pub logs_processed: u64,
    pub logs_duplicate: u64,
    pub logs_decompress_failed: u64,
    pub logs_inserted: u64,
    pub inserts_failed: u64,
    pub bytes_received: u64,
    pub bytes_decompressed: u64,
    pub compression_ratio: f64,
    pub logs_per_second: f64,
    pub dedup_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = IngestMetrics::new();
        metrics.record_batch_received(3, 120);
        metrics.record_batch_received(2, 80);
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_duplicate();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_received, 2);
        assert_eq!(snapshot.logs_received, 5);
        assert_eq!(snapshot.logs_processed, 2);
        assert_eq!(snapshot.logs_duplicate, 1);
        assert_eq!(snapshot.bytes_received, 200);
        assert_eq!(snapshot.dedup_rate, 0.2);
    }

    #[test]
    fn compression_ratio_requires_both_counters() {
        let metrics = IngestMetrics::new();
        metrics.record_batch_received(1, 100);
        assert_eq!(metrics.snapshot().compression_ratio, 0.0);

        metrics.record_decompressed(250);
        assert!((metrics.snapshot().compression_ratio - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fresh_process_is_healthy_until_grace_elapses() {
        let metrics = IngestMetrics::new();
        assert!(metrics.is_healthy());
        assert_eq!(metrics.last_insert_ago_seconds(), None);
    }

    #[test]
    fn insert_success_refreshes_health() {
        let metrics = IngestMetrics::new();
        metrics.record_insert_success(10);
        assert_eq!(metrics.logs_inserted(), 10);
        assert_eq!(metrics.last_insert_ago_seconds(), Some(0));
        assert!(metrics.is_healthy());
    }
}
