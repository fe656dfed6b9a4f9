//! Bulk-insert contract against the analytics store.
//!
//! The writer only ever talks to [`LogStore`]: prepare a batch, append
//! typed rows, then send (all rows commit) or abort (none do). The real
//! implementation speaks the columnar store's HTTP bulk-insert dialect;
//! [`MemoryStore`] is the in-process double used throughout the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use logflume_proto::LogEntry;
use serde::Serialize;
use tracing::debug;

/// One typed row as the store sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub timestamp_ns: i64,
    pub level: String,
    pub service: String,
    pub message: String,
    pub trace_id: String,
    pub agent_id: String,
    pub fields: HashMap<String, String>,
}

impl From<&LogEntry> for LogRow {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp_ns: entry.timestamp_ns,
            level: entry.level.clone(),
            service: entry.service().to_string(),
            message: entry.message.clone(),
            trace_id: entry
                .fields
                .get("trace_id")
                .cloned()
                .unwrap_or_default(),
            agent_id: entry.agent_id.clone(),
            fields: entry.fields.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store rejected insert with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A pending bulk insert. Either every appended row commits (`send`) or
/// none does (`abort` / drop).
#[async_trait]
pub trait RowBatch: Send {
    fn append(&mut self, row: LogRow);

    /// Commits all appended rows, returning how many were written.
    async fn send(self: Box<Self>) -> Result<usize, StoreError>;

    /// Discards the batch without touching the store.
    fn abort(self: Box<Self>);
}

/// Bulk-insert handle to the analytics store.
pub trait LogStore: Send + Sync {
    fn prepare_batch(&self, table: &str) -> Box<dyn RowBatch>;

    /// Whether the last interaction with the store succeeded. Feeds the
    /// health endpoint; defaults to connected for stores that cannot fail.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Columnar store client speaking the HTTP bulk-insert dialect:
/// `POST /?query=INSERT INTO <table> FORMAT JSONEachRow` with one JSON
/// object per row in the body. Partial failure is the store's concern;
/// any non-success status is treated as full failure.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    connected: Arc<AtomicBool>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl LogStore for HttpStore {
    fn prepare_batch(&self, table: &str) -> Box<dyn RowBatch> {
        Box::new(HttpRowBatch {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            table: table.to_string(),
            connected: Arc::clone(&self.connected),
            rows: Vec::new(),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

struct HttpRowBatch {
    client: reqwest::Client,
    base_url: String,
    table: String,
    connected: Arc<AtomicBool>,
    rows: Vec<LogRow>,
}

#[async_trait]
impl RowBatch for HttpRowBatch {
    fn append(&mut self, row: LogRow) {
        self.rows.push(row);
    }

    async fn send(self: Box<Self>) -> Result<usize, StoreError> {
        if self.rows.is_empty() {
            return Ok(0);
        }

        let mut body = String::with_capacity(self.rows.len() * 128);
        for row in &self.rows {
            match serde_json::to_string(row) {
                Ok(line) => {
                    body.push_str(&line);
                    body.push('\n');
                }
                Err(err) => {
                    // Row serialization cannot partially commit; fail the
                    // whole batch like any other insert failure.
                    return Err(StoreError::Unavailable(format!(
                        "failed to encode row: {err}"
                    )));
                }
            }
        }

        let query = format!("INSERT INTO {} FORMAT JSONEachRow", self.table);
        let result = self
            .client
            .post(&self.base_url)
            .query(&[("query", query.as_str())])
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.connected.store(true, Ordering::Relaxed);
                debug!(rows = self.rows.len(), table = %self.table, "bulk insert committed");
                Ok(self.rows.len())
            }
            Ok(response) => {
                self.connected.store(false, Ordering::Relaxed);
                let status = response.status().as_u16();
                let message = response.text().await.unwrap_or_default();
                Err(StoreError::Rejected { status, message })
            }
            Err(err) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(StoreError::Transport(err))
            }
        }
    }

    fn abort(self: Box<Self>) {
        debug!(rows = self.rows.len(), table = %self.table, "bulk insert aborted");
    }
}

/// In-memory store double: records committed rows, optionally failing on
/// demand so writer error paths can be exercised.
#[derive(Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<Vec<LogRow>>>,
    fail_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows committed so far, in insertion order.
    pub fn rows(&self) -> Vec<LogRow> {
        self.rows.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Makes every subsequent `send` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.fail_inserts.store(failing, Ordering::Relaxed);
    }
}

impl LogStore for MemoryStore {
    fn prepare_batch(&self, _table: &str) -> Box<dyn RowBatch> {
        Box::new(MemoryRowBatch {
            rows: Vec::new(),
            sink: Arc::clone(&self.rows),
            fail_inserts: Arc::clone(&self.fail_inserts),
        })
    }

    fn is_connected(&self) -> bool {
        !self.fail_inserts.load(Ordering::Relaxed)
    }
}

struct MemoryRowBatch {
    rows: Vec<LogRow>,
    sink: Arc<Mutex<Vec<LogRow>>>,
    fail_inserts: Arc<AtomicBool>,
}

#[async_trait]
impl RowBatch for MemoryRowBatch {
    fn append(&mut self, row: LogRow) {
        self.rows.push(row);
    }

    async fn send(self: Box<Self>) -> Result<usize, StoreError> {
        if self.fail_inserts.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store failing".to_string()));
        }
        let count = self.rows.len();
        if let Ok(mut sink) = self.sink.lock() {
            sink.extend(self.rows);
        }
        Ok(count)
    }

    fn abort(self: Box<Self>) {}
}
