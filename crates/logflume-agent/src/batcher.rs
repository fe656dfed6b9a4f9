//! Entry batching and compression.
//!
//! Single consumer of the parsed-entry channel. A batch flushes when the
//! buffer reaches the count threshold, the byte threshold from the live
//! policy, or the batch window elapses with entries present — whichever
//! fires first. Batch ids are strictly increasing and gap-free for the
//! lifetime of the agent session.

use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use logflume_core::policy::{SamplingPolicy, DEFAULT_BATCH_MAX_ENTRIES};
use logflume_proto::framing::{MessageSink, WireError};
use logflume_proto::{encode_entries, Compression, LogBatch, LogEntry};
use prost::Message;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::counters::AgentCounters;

/// Upper bound on the drain-and-flush performed at shutdown.
const SHUTDOWN_FLUSH_DEADLINE: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Batcher {
    entries: mpsc::Receiver<LogEntry>,
    agent_id: String,
    policy: watch::Receiver<Arc<SamplingPolicy>>,
    compression: bool,
    compression_level: i32,
    counters: Arc<AgentCounters>,
    next_batch_id: i64,
}

impl Batcher {
    pub fn new(
        entries: mpsc::Receiver<LogEntry>,
        agent_id: impl Into<String>,
        policy: watch::Receiver<Arc<SamplingPolicy>>,
        compression: bool,
        compression_level: i32,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            entries,
            agent_id: agent_id.into(),
            policy,
            compression,
            compression_level,
            counters,
            next_batch_id: 0,
        }
    }

    /// Consumes entries and writes batches to the stream until the entry
    /// channel closes or shutdown. On cancellation the remaining entries
    /// are drained into one final flush before the sink closes.
    pub async fn run<W: AsyncWrite + Unpin>(
        mut self,
        mut sink: MessageSink<W>,
        cancel: CancellationToken,
    ) -> Result<(), WireError> {
        let mut buffer: Vec<LogEntry> = Vec::new();
        let mut buffer_bytes = 0usize;
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
                received = self.entries.recv() => {
                    match received {
                        Some(entry) => {
                            let policy = Arc::clone(&self.policy.borrow());
                            if buffer.is_empty() {
                                deadline = Some(Instant::now() + policy.batch_window);
                            }
                            buffer_bytes += entry.encoded_len();
                            buffer.push(entry);

                            let max_bytes = policy.batch_size_kb * 1024;
                            if buffer.len() >= DEFAULT_BATCH_MAX_ENTRIES
                                || buffer_bytes >= max_bytes
                            {
                                self.flush(&mut buffer, &mut buffer_bytes, &mut sink).await?;
                                deadline = None;
                            }
                        }
                        None => {
                            self.flush(&mut buffer, &mut buffer_bytes, &mut sink).await?;
                            return Ok(());
                        }
                    }
                }
                () = timer => {
                    self.flush(&mut buffer, &mut buffer_bytes, &mut sink).await?;
                    deadline = None;
                }
                () = cancel.cancelled() => {
                    debug!("batcher shutting down, draining entry channel");
                    while let Ok(entry) = self.entries.try_recv() {
                        buffer_bytes += entry.encoded_len();
                        buffer.push(entry);
                    }
                    // Best-effort final flush, bounded so shutdown never
                    // hangs on a dead stream.
                    let drain = async {
                        self.flush(&mut buffer, &mut buffer_bytes, &mut sink).await?;
                        sink.close().await
                    };
                    match tokio::time::timeout(SHUTDOWN_FLUSH_DEADLINE, drain).await {
                        Ok(result) => result?,
                        Err(_) => warn!("final flush exceeded shutdown deadline"),
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn flush<W: AsyncWrite + Unpin>(
        &mut self,
        buffer: &mut Vec<LogEntry>,
        buffer_bytes: &mut usize,
        sink: &mut MessageSink<W>,
    ) -> Result<(), WireError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let batch = self.build_batch(std::mem::take(buffer));
        *buffer_bytes = 0;

        debug!(
            batch_id = batch.batch_id,
            logs = batch.logs.len(),
            original_size = batch.original_size,
            compressed = batch.compressed_payload.len(),
            "sending batch"
        );
        sink.send(&batch).await?;
        self.counters.record_batch_sent();
        Ok(())
    }

    /// Assembles one batch: next id, serialized entries, optional zstd
    /// payload. A compression failure falls back to an uncompressed batch.
    pub fn build_batch(&mut self, logs: Vec<LogEntry>) -> LogBatch {
        self.next_batch_id += 1;
        let policy = Arc::clone(&self.policy.borrow());

        let raw = encode_entries(&logs);
        let mut batch = LogBatch {
            agent_id: self.agent_id.clone(),
            batch_id: self.next_batch_id,
            emit_time_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            logs,
            original_size: raw.len() as u32,
            ..Default::default()
        };
        batch
            .metadata
            .insert("policy_version".to_string(), policy.version.clone());
        batch.metadata.insert(
            "agent_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        if self.compression {
            match compress(&raw, self.compression_level) {
                Ok(payload) => {
                    batch.set_compression(Compression::Zstd);
                    batch.compressed_payload = payload;
                }
                Err(err) => {
                    warn!(batch_id = batch.batch_id, %err, "compression failed, sending uncompressed");
                }
            }
        }
        batch
    }
}

fn compress(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish()
}
