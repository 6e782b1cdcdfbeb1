//! Shared run coordination
//!
//! Everything several run attempts (possibly in different processes) must
//! agree on lives in a [`CoordinationStore`]: the run lock, the pause flag,
//! the current-run marker, checkpoints, cancel requests and recovery
//! snapshots. The store is injected; nothing here is a process global.
//!
//! [`Coordination`] is the typed view the rest of the pipeline uses. It owns
//! the key layout and the JSON encoding of stored payloads.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::RunConfig;
use super::error::{IngestError, IngestResult};
use super::models::{Checkpoint, RecoverySnapshot};

pub use memory::InMemoryCoordinationStore;
pub use postgres::PgCoordinationStore;

/// Key-value store with per-entry expiry. Expired entries behave as absent.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key` only if it is absent. Returns whether the value was stored.
    async fn add(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<bool>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<()>;

    async fn get(&self, key: &str) -> IngestResult<Option<String>>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> IngestResult<bool>;

    /// Remove `key` only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> IngestResult<bool>;

    /// Extend the expiry of `key` only while it still holds `expected`.
    async fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> IngestResult<bool>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> IngestResult<u64>;
}

const LOCK_KEY: &str = "ingest:lock";
const PAUSE_KEY: &str = "ingest:pause";
const CURRENT_RUN_KEY: &str = "ingest:current_run";

fn checkpoint_key(run_id: Uuid) -> String {
    format!("ingest:checkpoint:{}", run_id)
}

fn cancel_key(run_id: Uuid) -> String {
    format!("ingest:cancel:{}", run_id)
}

fn recovery_key(run_id: Uuid) -> String {
    format!("ingest:recovery:{}", run_id)
}

/// Lock value: `<run id>@<host>`. Only the run id part is ever compared.
fn lock_value(run_id: Uuid, host: &str) -> String {
    format!("{}@{}", run_id, host)
}

fn holder_run_id(value: &str) -> Option<Uuid> {
    value.split('@').next().and_then(|id| id.parse().ok())
}

#[derive(Clone)]
pub struct Coordination {
    store: Arc<dyn CoordinationStore>,
    host: String,
    lock_ttl: Duration,
    checkpoint_ttl: Duration,
}

impl Coordination {
    pub fn new(store: Arc<dyn CoordinationStore>, run: &RunConfig) -> Self {
        Self {
            store,
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            lock_ttl: run.lock_ttl(),
            checkpoint_ttl: run.checkpoint_ttl(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Run lock
    // ------------------------------------------------------------------

    /// Take the single run slot for `run_id`, failing fast when it is held.
    pub async fn acquire_lock(&self, run_id: Uuid) -> IngestResult<()> {
        let value = lock_value(run_id, &self.host);
        if self.store.add(LOCK_KEY, &value, Some(self.lock_ttl)).await? {
            debug!(run_id = %run_id, "Run lock acquired");
            return Ok(());
        }

        let holder = self
            .store
            .get(LOCK_KEY)
            .await?
            .unwrap_or_else(|| "another run".to_string());
        Err(IngestError::LockContention { holder })
    }

    /// Extend the lock while `run_id` still holds it. `false` means the slot
    /// now belongs to someone else (or expired).
    pub async fn refresh_lock(&self, run_id: Uuid) -> IngestResult<bool> {
        match self.store.get(LOCK_KEY).await? {
            Some(value) if holder_run_id(&value) == Some(run_id) => {
                self.store.refresh(LOCK_KEY, &value, self.lock_ttl).await
            },
            _ => Ok(false),
        }
    }

    /// Release the lock if `run_id` holds it. Never removes a foreign lock.
    pub async fn release_lock(&self, run_id: Uuid) -> IngestResult<bool> {
        match self.store.get(LOCK_KEY).await? {
            Some(value) if holder_run_id(&value) == Some(run_id) => {
                let released = self.store.compare_and_delete(LOCK_KEY, &value).await?;
                debug!(run_id = %run_id, released, "Run lock released");
                Ok(released)
            },
            _ => Ok(false),
        }
    }

    pub async fn lock_holder(&self) -> IngestResult<Option<Uuid>> {
        Ok(self.store.get(LOCK_KEY).await?.as_deref().and_then(holder_run_id))
    }

    // ------------------------------------------------------------------
    // Pause flag and current-run marker
    // ------------------------------------------------------------------

    pub async fn set_paused(&self, paused: bool) -> IngestResult<()> {
        if paused {
            self.store.set(PAUSE_KEY, "1", None).await
        } else {
            self.store.delete(PAUSE_KEY).await.map(|_| ())
        }
    }

    pub async fn is_paused(&self) -> IngestResult<bool> {
        Ok(self.store.get(PAUSE_KEY).await?.is_some())
    }

    pub async fn set_current_run(&self, run_id: Uuid) -> IngestResult<()> {
        self.store.set(CURRENT_RUN_KEY, &run_id.to_string(), None).await
    }

    pub async fn current_run(&self) -> IngestResult<Option<Uuid>> {
        Ok(self
            .store
            .get(CURRENT_RUN_KEY)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    // ------------------------------------------------------------------
    // Cancel requests
    // ------------------------------------------------------------------

    pub async fn request_cancel(&self, run_id: Uuid) -> IngestResult<()> {
        self.store
            .set(&cancel_key(run_id), "1", Some(self.lock_ttl))
            .await
    }

    pub async fn is_cancel_requested(&self, run_id: Uuid) -> IngestResult<bool> {
        Ok(self.store.get(&cancel_key(run_id)).await?.is_some())
    }

    pub async fn clear_cancel(&self, run_id: Uuid) -> IngestResult<()> {
        self.store.delete(&cancel_key(run_id)).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Checkpoints and recovery snapshots
    // ------------------------------------------------------------------

    pub async fn save_checkpoint(&self, run_id: Uuid, checkpoint: &Checkpoint) -> IngestResult<()> {
        self.put_json(&checkpoint_key(run_id), checkpoint, self.checkpoint_ttl)
            .await
    }

    pub async fn load_checkpoint(&self, run_id: Uuid) -> IngestResult<Option<Checkpoint>> {
        self.get_json(&checkpoint_key(run_id)).await
    }

    pub async fn discard_checkpoint(&self, run_id: Uuid) -> IngestResult<()> {
        self.store.delete(&checkpoint_key(run_id)).await.map(|_| ())
    }

    pub async fn save_recovery_snapshot(&self, snapshot: &RecoverySnapshot) -> IngestResult<()> {
        self.put_json(&recovery_key(snapshot.run_id), snapshot, self.checkpoint_ttl)
            .await
    }

    pub async fn load_recovery_snapshot(&self, run_id: Uuid) -> IngestResult<Option<RecoverySnapshot>> {
        self.get_json(&recovery_key(run_id)).await
    }

    pub async fn discard_recovery_snapshot(&self, run_id: Uuid) -> IngestResult<()> {
        self.store.delete(&recovery_key(run_id)).await.map(|_| ())
    }

    pub async fn purge_expired(&self) -> IngestResult<u64> {
        self.store.purge_expired().await
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> IngestResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.store.set(key, &encoded, Some(ttl)).await
    }

    /// A payload that no longer decodes is dropped and reported as absent.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> IngestResult<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable coordination entry");
                self.store.delete(key).await?;
                Ok(None)
            },
        }
    }
}
