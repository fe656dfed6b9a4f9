//! Configuration distribution service.
//!
//! Serves one version-stamped policy document to any number of agents over
//! the framed request/response channel. The backing file is re-read on a
//! fixed cadence; the served `(version, bytes)` pair only changes when the
//! content hash changes, and changes atomically.

pub mod document;
pub mod server;

pub use document::DocumentStore;
