//! Stream receiver: terminates agent connections.
//!
//! One task per accepted stream loops over incoming batches, validates
//! compressed payloads, deduplicates entries, submits survivors to the
//! writer inbox, and acks each batch in processing order.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use logflume_proto::framing::{self, WireError};
use logflume_proto::{Ack, AckStatus, Compression, LogBatch, LogEntry};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedup::DedupCache;
use crate::metrics::IngestMetrics;

/// Everything a stream task needs, constructed once at startup.
#[derive(Clone)]
pub struct IngestState {
    pub metrics: Arc<IngestMetrics>,
    pub dedup: DedupCache,
    pub inbox: mpsc::Sender<LogEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("writer inbox closed")]
    InboxClosed,
}

/// Accepts agent streams until cancelled.
pub async fn serve(
    listener: TcpListener,
    state: IngestState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!(%peer, "agent stream connected");
                let state = state.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match handle_stream(stream, state, cancel).await {
                        Ok(()) => info!(%peer, "agent stream closed"),
                        Err(err) => warn!(%peer, %err, "agent stream failed"),
                    }
                });
            }
            () = cancel.cancelled() => {
                debug!("stream listener shutting down");
                return Ok(());
            }
        }
    }
}

/// Receives batches on one stream until the peer closes or shutdown.
pub async fn handle_stream(
    stream: TcpStream,
    state: IngestState,
    cancel: CancellationToken,
) -> Result<(), ReceiverError> {
    let (mut source, mut sink) = framing::split(stream);

    loop {
        let batch: LogBatch = tokio::select! {
            received = source.recv() => {
                match received? {
                    Some(batch) => batch,
                    None => return Ok(()),
                }
            }
            () = cancel.cancelled() => return Ok(()),
        };

        let ack = process_batch(&state, batch).await?;
        sink.send(&ack).await?;
    }
}

/// Runs one batch through decompression validation, dedup, and the inbox,
/// producing its ack.
async fn process_batch(state: &IngestState, batch: LogBatch) -> Result<Ack, ReceiverError> {
    let total = batch.logs.len();
    // Content bytes on the wire: with zstd the compressed payload is the
    // authoritative copy for ratio telemetry, the raw `logs` field being
    // the compatibility duplicate.
    let wire_bytes = if batch.compression() == Compression::Zstd {
        batch.compressed_payload.len()
    } else {
        batch.encoded_len()
    };
    state.metrics.record_batch_received(total, wire_bytes);

    if batch.compression() == Compression::Zstd {
        match zstd::decode_all(batch.compressed_payload.as_slice()) {
            Ok(raw) => state.metrics.record_decompressed(raw.len()),
            Err(err) => {
                // The whole batch is suspect; ask the sender to retry it.
                state.metrics.record_decompress_failure(total);
                warn!(
                    agent_id = %batch.agent_id,
                    batch_id = batch.batch_id,
                    %err,
                    "failed to decompress batch payload"
                );
                return Ok(ack(
                    batch.batch_id,
                    AckStatus::Retry,
                    format!("decompression failed: {err}"),
                ));
            }
        }
    }

    let mut processed = 0usize;
    for entry in batch.logs {
        let key = DedupCache::key(&entry);
        if state.dedup.check_and_insert(key) {
            state
                .inbox
                .send(entry)
                .await
                .map_err(|_| ReceiverError::InboxClosed)?;
            state.metrics.record_processed();
            processed += 1;
        } else {
            state.metrics.record_duplicate();
        }
    }

    debug!(
        agent_id = %batch.agent_id,
        batch_id = batch.batch_id,
        processed,
        total,
        "batch processed"
    );
    Ok(ack(
        batch.batch_id,
        AckStatus::Success,
        format!("Processed {processed}/{total} logs"),
    ))
}

fn ack(batch_id: i64, status: AckStatus, message: String) -> Ack {
    let mut ack = Ack {
        batch_id,
        message,
        server_timestamp_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        ..Default::default()
    };
    ack.set_status(status);
    ack
}
