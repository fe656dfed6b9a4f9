//! File tailer: backfill then notification-driven incremental reads.
//!
//! One tailer task per watched path. At startup the file is read from the
//! beginning (backfill); afterwards a filesystem watcher drives reads from
//! the current offset to end-of-file. Lines are split at newlines and a
//! trailing fragment is carried over until its newline arrives.
//!
//! Rotation and truncation of the watched file are not handled in this
//! version; the watcher only follows appends.

use std::path::PathBuf;
use std::sync::Arc;

use logflume_proto::LogEntry;
use notify::{RecursiveMode, Watcher};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::counters::AgentCounters;
use crate::parser::LogParser;
use crate::sampler::Sampler;

pub struct Tailer {
    path: PathBuf,
    parser: Arc<LogParser>,
    sampler: Sampler,
    counters: Arc<AgentCounters>,
    output: mpsc::Sender<LogEntry>,
}

impl Tailer {
    pub fn new(
        path: PathBuf,
        parser: Arc<LogParser>,
        sampler: Sampler,
        counters: Arc<AgentCounters>,
        output: mpsc::Sender<LogEntry>,
    ) -> Self {
        Self {
            path,
            parser,
            sampler,
            counters,
            output,
        }
    }

    /// Tails the file until cancellation. A missing file or watcher
    /// failure ends this tailer only; other paths keep running.
    pub async fn run(self, cancel: CancellationToken) {
        let source = self.path.display().to_string();

        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %source, %err, "log file not found, skipping");
                return;
            }
        };

        // Backfill: everything already in the file, oldest first.
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = Vec::new();
        if let Err(err) = file.read_to_end(&mut chunk).await {
            warn!(path = %source, %err, "failed to read existing log content");
            return;
        }
        let backfilled = self.forward_chunk(&mut pending, &chunk, &source).await;
        let Some(backfilled) = backfilled else {
            return; // Downstream closed during backfill.
        };
        info!(path = %source, lines = backfilled, "processed existing logs");

        // Incremental: filesystem notifications bridged onto a channel.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut watcher = match notify::recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        }) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(path = %source, %err, "failed to create filesystem watcher");
                return;
            }
        };
        if let Err(err) = watcher.watch(&self.path, RecursiveMode::NonRecursive) {
            warn!(path = %source, %err, "failed to watch log file");
            return;
        }

        loop {
            tokio::select! {
                received = event_rx.recv() => {
                    match received {
                        Some(Ok(event)) if is_content_change(&event) => {
                            chunk.clear();
                            if let Err(err) = file.read_to_end(&mut chunk).await {
                                warn!(path = %source, %err, "failed to read appended content");
                                continue;
                            }
                            if self.forward_chunk(&mut pending, &chunk, &source).await.is_none() {
                                return;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(path = %source, %err, "filesystem watcher error");
                        }
                        None => {
                            debug!(path = %source, "watcher channel closed");
                            return;
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!(path = %source, "tailer shutting down");
                    return;
                }
            }
        }
    }

    /// Splits a chunk into lines (carrying a trailing fragment) and pushes
    /// surviving entries downstream. Returns the number of forwarded
    /// entries, or `None` when the downstream channel closed.
    async fn forward_chunk(
        &self,
        pending: &mut Vec<u8>,
        chunk: &[u8],
        source: &str,
    ) -> Option<u64> {
        pending.extend_from_slice(chunk);

        let mut forwarded = 0;
        while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.counters.record_line();
            let Some(entry) = self.parser.parse(line, source) else {
                self.counters.record_parse_failure();
                continue;
            };
            if !self.sampler.should_keep(&entry) {
                self.counters.record_sampled_out();
                continue;
            }

            // The only backpressure to the tailer: block when the batcher
            // is behind.
            if self.output.send(entry).await.is_err() {
                debug!(path = %source, "entry channel closed, stopping tailer");
                return None;
            }
            self.counters.record_entry_forwarded();
            forwarded += 1;
        }
        Some(forwarded)
    }
}

fn is_content_change(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Any | notify::EventKind::Create(_)
    )
}
