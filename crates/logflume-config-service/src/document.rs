//! The served configuration document and its reload loop.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use logflume_core::policy::version_of;
use logflume_proto::ConfigResponse;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Atomically swapped `(version, payload)` pair.
///
/// Read-heavy: every `GetConfig` takes the read lock, only the reload loop
/// ever writes. Readers see either the old pair or the new pair, never a
/// mix.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<Option<Loaded>>,
}

#[derive(Debug, Clone)]
struct Loaded {
    version: String,
    payload: Arc<Vec<u8>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-reads the backing file and swaps the served pair if the content
    /// hash changed. An unreadable file leaves the previous document in
    /// place; a partial or invalid read is never served.
    pub fn load_from(&self, path: &Path) {
        let payload = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read config file, keeping previous document");
                return;
            }
        };

        let version = version_of(&payload);
        let mut guard = self.write();
        match guard.as_ref() {
            Some(current) if current.version == version => {}
            Some(current) => {
                info!(new = %version, previous = %current.version, "loaded new config version");
                *guard = Some(Loaded {
                    version,
                    payload: Arc::new(payload),
                });
            }
            None => {
                info!(version = %version, "loaded initial config version");
                *guard = Some(Loaded {
                    version,
                    payload: Arc::new(payload),
                });
            }
        }
    }

    /// Currently served version; empty when no document was ever loaded.
    pub fn version(&self) -> String {
        self.read().as_ref().map(|l| l.version.clone()).unwrap_or_default()
    }

    /// Builds the `GetConfig` reply: the payload is omitted when the agent
    /// already holds the served version.
    pub fn respond(&self, current_version: &str) -> ConfigResponse {
        let guard = self.read();
        match guard.as_ref() {
            Some(loaded) if loaded.version == current_version => ConfigResponse {
                version: loaded.version.clone(),
                payload: Vec::new(),
            },
            Some(loaded) => ConfigResponse {
                version: loaded.version.clone(),
                payload: loaded.payload.as_ref().clone(),
            },
            // Never loaded: agents fall back to their built-in defaults.
            None => ConfigResponse::default(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Loaded>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Loaded>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Re-reads the backing file on a fixed cadence until cancelled.
pub async fn run_reload_loop(
    store: Arc<DocumentStore>,
    path: std::path::PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; the initial load already happened.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                store.load_from(&path);
            }
            () = cancel.cancelled() => {
                debug!("config reload loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with(payload: &[u8]) -> (DocumentStore, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(payload).unwrap();
        file.flush().unwrap();
        let store = DocumentStore::new();
        store.load_from(file.path());
        (store, file)
    }

    #[test]
    fn never_loaded_serves_empty_version_and_payload() {
        let store = DocumentStore::new();
        let response = store.respond("");
        assert_eq!(response.version, "");
        assert!(response.payload.is_empty());
    }

    #[test]
    fn serves_full_payload_to_stale_agents() {
        let (store, _file) = store_with(b"sampling: {}\n");
        let response = store.respond("");
        assert_eq!(response.version.len(), 16);
        assert_eq!(response.payload, b"sampling: {}\n");
    }

    #[test]
    fn serves_empty_payload_to_current_agents() {
        let (store, _file) = store_with(b"sampling: {}\n");
        let version = store.version();
        let response = store.respond(&version);
        assert_eq!(response.version, version);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn version_changes_only_when_content_changes() {
        let (store, file) = store_with(b"a: 1\n");
        let first = store.version();

        // Identical content: same version.
        store.load_from(file.path());
        assert_eq!(store.version(), first);

        std::fs::write(file.path(), b"a: 2\n").unwrap();
        store.load_from(file.path());
        assert_ne!(store.version(), first);
    }

    #[test]
    fn unreadable_file_retains_previous_document() {
        let (store, file) = store_with(b"a: 1\n");
        let version = store.version();

        let path = file.path().to_path_buf();
        drop(file);
        store.load_from(&path);

        assert_eq!(store.version(), version);
        assert_eq!(store.respond("").payload, b"a: 1\n");
    }
}
