//! Single-process coordination store.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with a paused clock
//! can move entries past their TTL with `tokio::time::advance`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::CoordinationStore;
use crate::ingest::error::IngestResult;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn add(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> IngestResult<Option<String>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> IngestResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> IngestResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(e) if e.is_live(now) && e.value == expected => {
                entries.remove(key);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> IngestResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(e) if e.is_live(now) && e.value == expected => {
                e.expires_at = Some(now + ttl);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> IngestResult<u64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_is_set_if_absent() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.add("k", "a", None).await.unwrap());
        assert!(!store.add("k", "b", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryCoordinationStore::new();
        store.set("k", "v", Some(Duration::from_secs(5))).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.add("k", "w", None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_matching_entry_only() {
        let store = InMemoryCoordinationStore::new();
        store.set("k", "v", Some(Duration::from_secs(5))).await.unwrap();

        assert!(!store.refresh("k", "other", Duration::from_secs(60)).await.unwrap());
        assert!(store.refresh("k", "v", Duration::from_secs(60)).await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = InMemoryCoordinationStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(!store.compare_and_delete("k", "x").await.unwrap());
        assert!(store.compare_and_delete("k", "v").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryCoordinationStore::new();
        store.set("short", "v", Some(Duration::from_secs(1))).await.unwrap();
        store.set("forever", "v", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("forever").await.unwrap().is_some());
    }
}
