//! Protobuf models for the logflume wire contract.
//!
//! The message types mirror `proto/logflume/logflume.proto`. They are
//! hand-derived with `prost::Message` rather than generated at build time,
//! so the workspace builds without a protoc toolchain; the `.proto` file
//! remains the source of truth for field numbers.
//!
//! [`framing`] carries these messages as length-delimited frames over any
//! reliable byte stream.

use std::collections::HashMap;

pub mod framing;

/// One parsed log record.
///
/// `timestamp_ns` always comes from the source line, never from collection
/// wall-clock. `fields` carries at least `service`, and optionally
/// `trace_id`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    #[prost(int64, tag = "1")]
    pub timestamp_ns: i64,
    #[prost(string, tag = "2")]
    pub level: String,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(string, tag = "4")]
    pub source: String,
    #[prost(string, tag = "5")]
    pub agent_id: String,
    #[prost(map = "string, string", tag = "6")]
    pub fields: HashMap<String, String>,
}

impl LogEntry {
    /// The `service` field value, or the empty string when absent.
    pub fn service(&self) -> &str {
        self.fields.get("service").map_or("", String::as_str)
    }
}

/// Payload compression applied to [`LogBatch::compressed_payload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Compression {
    None = 0,
    Zstd = 1,
}

/// Unit of transmission from one agent to the ingestion service.
///
/// `batch_id` values are strictly increasing and gap-free within one agent
/// session. When `compression != NONE`, `compressed_payload` decodes to the
/// concatenated encodings of `logs`; the raw `logs` field is retained
/// alongside for receiver compatibility.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogBatch {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(int64, tag = "2")]
    pub batch_id: i64,
    #[prost(int64, tag = "3")]
    pub emit_time_ms: i64,
    #[prost(message, repeated, tag = "4")]
    pub logs: Vec<LogEntry>,
    #[prost(enumeration = "Compression", tag = "5")]
    pub compression_tag: i32,
    #[prost(bytes = "vec", tag = "6")]
    pub compressed_payload: Vec<u8>,
    #[prost(uint32, tag = "7")]
    pub original_size: u32,
    #[prost(map = "string, string", tag = "8")]
    pub metadata: HashMap<String, String>,
}

impl LogBatch {
    /// The compression tag, defaulting to `NONE` for unknown values.
    pub fn compression(&self) -> Compression {
        Compression::try_from(self.compression_tag).unwrap_or(Compression::None)
    }

    pub fn set_compression(&mut self, value: Compression) {
        self.compression_tag = value as i32;
    }
}

/// Outcome of a batch on the receiving side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AckStatus {
    Success = 0,
    Retry = 1,
    Drop = 2,
}

/// Receiver-to-sender reply, one per batch, emitted in processing order.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(int64, tag = "1")]
    pub batch_id: i64,
    #[prost(enumeration = "AckStatus", tag = "2")]
    pub status_tag: i32,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(int64, tag = "4")]
    pub server_timestamp_ms: i64,
}

impl Ack {
    /// The ack status, defaulting to `RETRY` for unknown values so senders
    /// never mistake an unrecognized reply for success.
    pub fn status(&self) -> AckStatus {
        AckStatus::try_from(self.status_tag).unwrap_or(AckStatus::Retry)
    }

    pub fn set_status(&mut self, value: AckStatus) {
        self.status_tag = value as i32;
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigRequest {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub current_version: String,
}

/// `payload` is empty when `current_version` already matches.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigResponse {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

/// Serializes entries into the concatenated byte stream shipped inside
/// `compressed_payload`. Raw concatenation is not self-delimiting, which is
/// why `LogBatch::logs` is retained as the readable copy.
pub fn encode_entries(entries: &[LogEntry]) -> Vec<u8> {
    use prost::Message;

    let mut out = Vec::with_capacity(entries.iter().map(Message::encoded_len).sum());
    for entry in entries {
        out.extend_from_slice(&entry.encode_to_vec());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn sample_entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp_ns: 1_730_534_400_000_000_000,
            level: "INFO".to_string(),
            message: message.to_string(),
            source: "/logs/application.log".to_string(),
            agent_id: "agent-1".to_string(),
            fields: HashMap::from([("service".to_string(), "checkout".to_string())]),
        }
    }

    #[test]
    fn entry_service_accessor() {
        let entry = sample_entry("hello");
        assert_eq!(entry.service(), "checkout");

        let bare = LogEntry::default();
        assert_eq!(bare.service(), "");
    }

    #[test]
    fn batch_compression_accessor_defaults_to_none() {
        let mut batch = LogBatch::default();
        assert_eq!(batch.compression(), Compression::None);

        batch.set_compression(Compression::Zstd);
        assert_eq!(batch.compression(), Compression::Zstd);

        // Unknown tags from a newer sender must not be misread as zstd.
        batch.compression_tag = 42;
        assert_eq!(batch.compression(), Compression::None);
    }

    #[test]
    fn ack_status_accessor_defaults_to_retry() {
        let mut ack = Ack {
            batch_id: 7,
            ..Default::default()
        };
        assert_eq!(ack.status(), AckStatus::Success);

        ack.status_tag = 99;
        assert_eq!(ack.status(), AckStatus::Retry);
    }

    #[test]
    fn encode_entries_concatenates_encodings() {
        let entries = vec![sample_entry("one"), sample_entry("two")];
        let joined = encode_entries(&entries);

        let expected: usize = entries.iter().map(Message::encoded_len).sum();
        assert_eq!(joined.len(), expected);
        assert!(joined.starts_with(&entries[0].encode_to_vec()));
    }

    #[test]
    fn batch_survives_encode_decode() {
        let batch = LogBatch {
            agent_id: "agent-1".to_string(),
            batch_id: 3,
            emit_time_ms: 1_730_534_400_123,
            logs: vec![sample_entry("payment failed")],
            compression_tag: Compression::None as i32,
            compressed_payload: Vec::new(),
            original_size: 0,
            metadata: HashMap::from([("policy_version".to_string(), "abcd".to_string())]),
        };

        let decoded = LogBatch::decode(batch.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.logs[0].message, "payment failed");
    }
}
