//! Short-lived provider task metadata
//!
//! Process-local and not a system of record: every status or result call can
//! be rebuilt from the model path and request id, so a miss only costs extra
//! HTTP round-trips. Entries expire after a fixed TTL and are purged lazily at
//! the start of each public operation.

use crate::provider::JobStatus;
use serde_json::Value;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Cached submission metadata for one provider task
#[derive(Debug, Clone)]
pub struct TaskCacheEntry {
    pub task_id: String,
    pub model: String,
    pub status: JobStatus,
    pub created_at: Instant,
    pub status_url: Option<String>,
    pub response_url: Option<String>,
    /// Last raw status/result payload
    pub raw_result: Option<Value>,
    /// Raw submission response
    pub queue_response: Option<Value>,
    pub error: Option<String>,
}

impl TaskCacheEntry {
    pub fn new(task_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            model: model.into(),
            status: JobStatus::Queued,
            created_at: Instant::now(),
            status_url: None,
            response_url: None,
            raw_result: None,
            queue_response: None,
            error: None,
        }
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// TTL-evicted map from provider task id to [`TaskCacheEntry`]
#[derive(Debug)]
pub struct TaskCache {
    entries: DashMap<String, TaskCacheEntry>,
    ttl: Duration,
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl TaskCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn put(&self, task_id: impl Into<String>, entry: TaskCacheEntry) {
        self.purge_expired();
        self.entries.insert(task_id.into(), entry);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskCacheEntry> {
        self.purge_expired();
        self.entries.get(task_id).map(|entry| entry.value().clone())
    }

    /// Mutate an existing entry in place and restart its TTL. Returns false
    /// when absent.
    pub fn update<F>(&self, task_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut TaskCacheEntry),
    {
        self.purge_expired();
        match self.entries.get_mut(task_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                entry.created_at = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        let stale = self.stale_keys(now);
        if !stale.is_empty() {
            let removed = self.remove_if_stale(&stale, now);
            debug!(removed, "Purged expired task cache entries");
        }
    }

    fn stale_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().is_stale(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect()
    }

    // A key may have been rewritten since the snapshot; only drop entries
    // that are still stale.
    fn remove_if_stale(&self, keys: &[String], now: Instant) -> usize {
        keys.iter()
            .filter(|key| {
                self.entries
                    .remove_if(key.as_str(), |_, entry| entry.is_stale(now, self.ttl))
                    .is_some()
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aged_entry(task_id: &str, age: Duration) -> TaskCacheEntry {
        let mut entry = TaskCacheEntry::new(task_id, "fal-ai/flux");
        entry.created_at = Instant::now().checked_sub(age).unwrap();
        entry
    }

    #[test]
    fn test_put_and_get() {
        let cache = TaskCache::default();
        cache.put("req-1", TaskCacheEntry::new("req-1", "fal-ai/flux"));

        let entry = cache.get("req-1").unwrap();
        assert_eq!(entry.model, "fal-ai/flux");
        assert_eq!(entry.status, JobStatus::Queued);
        assert!(cache.get("req-2").is_none());
    }

    #[test]
    fn test_expired_entries_are_purged_on_access() {
        let cache = TaskCache::new(Duration::from_secs(60));
        cache.put("old", aged_entry("old", Duration::from_secs(120)));
        cache.put("fresh", TaskCacheEntry::new("fresh", "fal-ai/flux"));

        assert!(cache.get("old").is_none());
        assert!(cache.get("fresh").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_existing_entry() {
        let cache = TaskCache::default();
        cache.put("req-1", TaskCacheEntry::new("req-1", "fal-ai/flux"));

        let updated = cache.update("req-1", |entry| {
            entry.status = JobStatus::Succeeded;
            entry.raw_result = Some(json!({"images": [{"url": "https://cdn/x.png"}]}));
        });
        assert!(updated);
        assert!(!cache.update("missing", |_| {}));

        let entry = cache.get("req-1").unwrap();
        assert_eq!(entry.status, JobStatus::Succeeded);
        assert!(entry.raw_result.is_some());
    }

    #[test]
    fn test_purge_keeps_entry_rewritten_after_snapshot() {
        let cache = TaskCache::new(Duration::from_secs(60));
        cache
            .entries
            .insert("req-1".into(), aged_entry("req-1", Duration::from_secs(120)));

        let now = Instant::now();
        let stale = cache.stale_keys(now);
        assert_eq!(stale, vec!["req-1".to_string()]);

        // A writer replaces the entry before the purge reaches it
        cache
            .entries
            .insert("req-1".into(), TaskCacheEntry::new("req-1", "fal-ai/flux"));

        assert_eq!(cache.remove_if_stale(&stale, now), 0);
        assert!(cache.get("req-1").is_some());
    }

    #[test]
    fn test_update_restarts_ttl() {
        let cache = TaskCache::new(Duration::from_secs(60));
        cache
            .entries
            .insert("req-1".into(), aged_entry("req-1", Duration::from_secs(50)));

        assert!(cache.update("req-1", |entry| entry.status = JobStatus::Processing));

        let entry = cache.get("req-1").unwrap();
        assert!(entry.created_at.elapsed() < Duration::from_secs(5));
        assert_eq!(entry.status, JobStatus::Processing);
    }
}
