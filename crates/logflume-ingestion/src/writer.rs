//! Buffered store writer.
//!
//! Single consumer of the receiver inbox. Entries accumulate into a slice
//! that flushes on a count threshold or a timeout measured from the first
//! entry of the current slice, whichever fires first. A failed bulk insert
//! discards the slice — there is no persistent retry queue in this
//! version, only the counter.

use std::sync::Arc;
use std::time::Duration;

use logflume_proto::LogEntry;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::IngestMetrics;
use crate::store::{LogRow, LogStore};

/// Entries per flush.
pub const FLUSH_MAX_ENTRIES: usize = 100;
/// Time from the first buffered entry to a forced flush.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on the shutdown drain.
const SHUTDOWN_FLUSH_DEADLINE: Duration = Duration::from_secs(5);

pub struct Writer {
    inbox: mpsc::Receiver<LogEntry>,
    store: Arc<dyn LogStore>,
    table: String,
    metrics: Arc<IngestMetrics>,
    cancel: CancellationToken,
    max_entries: usize,
    flush_timeout: Duration,
}

impl Writer {
    pub fn new(
        inbox: mpsc::Receiver<LogEntry>,
        store: Arc<dyn LogStore>,
        table: String,
        metrics: Arc<IngestMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inbox,
            store,
            table,
            metrics,
            cancel,
            max_entries: FLUSH_MAX_ENTRIES,
            flush_timeout: FLUSH_TIMEOUT,
        }
    }

    /// Overrides the flush thresholds (used by tests with tight timing).
    pub fn with_thresholds(mut self, max_entries: usize, flush_timeout: Duration) -> Self {
        self.max_entries = max_entries;
        self.flush_timeout = flush_timeout;
        self
    }

    /// Drains the inbox until cancellation or channel closure, appending
    /// entries to the store in receive order.
    pub async fn run(mut self) {
        let mut slice: Vec<LogEntry> = Vec::with_capacity(self.max_entries);
        let mut deadline: Option<Instant> = None;

        loop {
            // `move` copies the deadline so the handler bodies may reset it.
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                received = self.inbox.recv() => {
                    match received {
                        Some(entry) => {
                            if slice.is_empty() {
                                deadline = Some(Instant::now() + self.flush_timeout);
                            }
                            slice.push(entry);
                            if slice.len() >= self.max_entries {
                                self.flush(&mut slice).await;
                                deadline = None;
                            }
                        }
                        None => {
                            // All receivers gone; flush what is left and stop.
                            self.flush(&mut slice).await;
                            break;
                        }
                    }
                }
                () = timer => {
                    self.flush(&mut slice).await;
                    deadline = None;
                }
                () = self.cancel.cancelled() => {
                    debug!("writer shutting down, draining inbox");
                    while let Ok(entry) = self.inbox.try_recv() {
                        slice.push(entry);
                    }
                    let final_flush = self.flush(&mut slice);
                    if tokio::time::timeout(SHUTDOWN_FLUSH_DEADLINE, final_flush)
                        .await
                        .is_err()
                    {
                        error!("final flush exceeded shutdown deadline, entries lost");
                    }
                    break;
                }
            }
        }
        info!("writer stopped");
    }

    async fn flush(&self, slice: &mut Vec<LogEntry>) {
        if slice.is_empty() {
            return;
        }

        let mut batch = self.store.prepare_batch(&self.table);
        for entry in slice.iter() {
            batch.append(LogRow::from(entry));
        }

        let count = slice.len();
        match batch.send().await {
            Ok(written) => {
                self.metrics.record_insert_success(written);
                debug!(rows = written, "flushed slice to store");
            }
            Err(err) => {
                // The slice is discarded either way; the counter is the
                // only record of the loss.
                self.metrics.record_insert_failure();
                error!(%err, rows = count, "bulk insert failed, discarding slice");
            }
        }
        slice.clear();
    }
}
