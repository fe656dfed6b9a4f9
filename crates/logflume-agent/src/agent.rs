//! Top-level agent orchestration.
//!
//! Wires the pipeline together: initial config fetch, stream connection,
//! one tailer task per path, the poller and ack-reader tasks, and the
//! batcher in the foreground so stream errors surface from [`Agent::run`].

use std::sync::Arc;
use std::time::Duration;

use logflume_core::circuit_breaker::CircuitBreaker;
use logflume_core::config::AgentConfig;
use logflume_core::policy::SamplingPolicy;
use logflume_proto::framing;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batcher::Batcher;
use crate::counters::AgentCounters;
use crate::parser::LogParser;
use crate::poller::ConfigPoller;
use crate::sampler::Sampler;
use crate::stream::{connect_with_retry, AckReader};
use crate::tailer::Tailer;
use crate::{AgentError, ENTRY_CHANNEL_CAPACITY};

pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Runs the whole pipeline until cancellation or a fatal stream error.
    ///
    /// On cancellation the tailers stop, the batcher drains the entry
    /// channel into one final flush, and the stream closes. A stream error
    /// is returned to the operator; this version does not reconnect
    /// in-process.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), AgentError> {
        let config = self.config;
        let counters = Arc::new(AgentCounters::new());
        let parser = Arc::new(LogParser::new(config.agent_id.clone()));

        // Live policy snapshot, swapped atomically by the poller.
        let (policy_tx, policy_rx) = watch::channel(Arc::new(SamplingPolicy::default()));
        let poller = ConfigPoller::new(
            config.agent_id.clone(),
            config.config_url.clone(),
            policy_tx,
            Arc::clone(&counters),
        );
        // Fetch the initial policy before any line is sampled; on failure
        // the built-in defaults stay live and the poller catches up later.
        poller.poll_once(&cancel).await;

        let breaker = CircuitBreaker::new("ingestion-service", 5, Duration::from_secs(30));
        let stream = connect_with_retry(&config.ingestion_url, &breaker, &cancel).await?;
        let (ack_source, batch_sink) = framing::split(stream);
        let ack_task = tokio::spawn(AckReader::new(ack_source).run(cancel.clone()));

        let poller_task = tokio::spawn(poller.run(cancel.clone()));

        let (entry_tx, entry_rx) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);
        let sampler = Sampler::new(policy_rx.clone());
        let mut tailer_tasks = Vec::new();
        for path in &config.log_paths {
            let tailer = Tailer::new(
                path.clone(),
                Arc::clone(&parser),
                sampler.clone(),
                Arc::clone(&counters),
                entry_tx.clone(),
            );
            tailer_tasks.push(tokio::spawn(tailer.run(cancel.clone())));
        }
        // The batcher owns the only other sender; once every tailer exits
        // the entry channel closes and the batcher drains out.
        drop(entry_tx);

        info!(
            agent_id = %config.agent_id,
            paths = config.log_paths.len(),
            compression = config.compression,
            "agent pipeline started"
        );

        let batcher = Batcher::new(
            entry_rx,
            config.agent_id.clone(),
            policy_rx,
            config.compression,
            config.compression_level,
            Arc::clone(&counters),
        );
        let result = batcher.run(batch_sink, cancel.clone()).await;

        // Whether this is shutdown or a stream failure, stop everything.
        cancel.cancel();
        for task in tailer_tasks {
            let _ = task.await;
        }
        let _ = poller_task.await;
        let _ = ack_task.await;

        info!(
            lines_read = counters.lines_read(),
            parse_failures = counters.parse_failures(),
            sampled_out = counters.sampled_out(),
            entries_forwarded = counters.entries_forwarded(),
            batches_sent = counters.batches_sent(),
            "agent pipeline stopped"
        );
        result.map_err(AgentError::Wire)
    }
}
