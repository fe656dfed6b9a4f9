//! Sliding-window deduplication cache.
//!
//! Keys hash `(message, level, service)` — the timestamp is deliberately
//! excluded so a burst of identical events inside the window collapses to
//! one stored row. Each admitted key schedules its own deferred deletion;
//! after the window elapses with no re-occurrence a fresh sighting is
//! admitted again.
//!
//! The cache is process-local and best-effort: check-and-set is atomic per
//! key, but there is no cross-replica coordination.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use logflume_proto::LogEntry;

#[derive(Debug, Clone)]
pub struct DedupCache {
    window: Duration,
    seen: Arc<Mutex<HashSet<u64>>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Dedup key for one entry. Uses the stdlib hasher: the cache never
    /// leaves this process, so cross-process stability is not required.
    pub fn key(entry: &LogEntry) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        entry.message.hash(&mut hasher);
        entry.level.hash(&mut hasher);
        entry.service().hash(&mut hasher);
        hasher.finish()
    }

    /// Admits a first sighting (scheduling its expiry) and returns `true`;
    /// returns `false` for a duplicate inside the window.
    pub fn check_and_insert(&self, key: u64) -> bool {
        {
            let mut seen = self.lock();
            if !seen.insert(key) {
                return false;
            }
        }

        let seen = Arc::clone(&self.seen);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Ok(mut guard) = seen.lock() {
                guard.remove(&key);
            }
        });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(message: &str, level: &str, service: &str) -> LogEntry {
        LogEntry {
            timestamp_ns: 1,
            level: level.to_string(),
            message: message.to_string(),
            source: "/logs/app.log".to_string(),
            agent_id: "agent-1".to_string(),
            fields: HashMap::from([("service".to_string(), service.to_string())]),
        }
    }

    #[test]
    fn key_ignores_timestamp_and_agent() {
        let mut a = entry("disk full", "ERROR", "storage");
        let mut b = entry("disk full", "ERROR", "storage");
        a.timestamp_ns = 100;
        b.timestamp_ns = 999_999;
        b.agent_id = "agent-2".to_string();
        assert_eq!(DedupCache::key(&a), DedupCache::key(&b));
    }

    #[test]
    fn key_differs_by_message_level_and_service() {
        let base = entry("disk full", "ERROR", "storage");
        assert_ne!(
            DedupCache::key(&base),
            DedupCache::key(&entry("disk almost full", "ERROR", "storage"))
        );
        assert_ne!(
            DedupCache::key(&base),
            DedupCache::key(&entry("disk full", "WARN", "storage"))
        );
        assert_ne!(
            DedupCache::key(&base),
            DedupCache::key(&entry("disk full", "ERROR", "compute"))
        );
    }

    #[tokio::test]
    async fn duplicates_inside_window_are_rejected() {
        let cache = DedupCache::new(Duration::from_secs(60));
        let key = DedupCache::key(&entry("disk full", "ERROR", "storage"));

        assert!(cache.check_and_insert(key));
        assert!(!cache.check_and_insert(key));
        assert!(!cache.check_and_insert(key));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn keys_expire_after_the_window() {
        let cache = DedupCache::new(Duration::from_millis(30));
        let key = DedupCache::key(&entry("disk full", "ERROR", "storage"));

        assert!(cache.check_and_insert(key));
        assert!(!cache.check_and_insert(key));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty());
        assert!(cache.check_and_insert(key));
    }
}
