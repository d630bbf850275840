//! # Write-Coalescing Store
//!
//! Buffers writes in memory and flushes them to storage after a short delay.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Write-Coalescing Store                                │
//! │                                                                         │
//! │  set(k, v) ──► memory[k] = v, pending += k ──► schedule flush (100ms)   │
//! │  remove(k) ──► memory[k] = ⊘, pending += k ──► schedule flush           │
//! │                                                                         │
//! │  get(k) ──► memory[k]? ──yes──► value                                  │
//! │                 │ no                                                    │
//! │                 ▼                                                       │
//! │            CacheLayer::get_value ──► populate memory                    │
//! │                                                                         │
//! │  flush_changes()                                                        │
//! │     take pending ──► KeyValueStorage::set / remove, one key at a time   │
//! │                                                                         │
//! │  ChangeBus (other instances only)                                       │
//! │     key pending here?  ──yes──► ignore (local write wins)               │
//! │                        ──no───► memory[k] = newValue                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Visibility
//! Reads on this instance see its own writes immediately. Other instances
//! see them after the flush and the change notification.
//!
//! ## Hot Keys
//! [`HOT_KEYS`](crate::keys::HOT_KEYS) (locations and master lists) are read
//! into memory when the store opens, so form dropdowns never wait on SQLite.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::error::{StoreError, StoreResult};
use crate::keys::HOT_KEYS;
use crate::kv::KeyValueStorage;
use crate::notify::{StorageChange, SubscriptionId};

/// A memory-resident value or a removal that has not been flushed away.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Value(Value),
    Removed,
}

#[derive(Default)]
struct CoalesceState {
    memory: HashMap<String, Slot>,
    /// Keys written in memory but not yet flushed, in flush order.
    pending: BTreeSet<String>,
    flush_scheduled: bool,
    disposed: bool,
    /// Bumped whenever an external change lands, to drop stale fills.
    generation: u64,
}

struct Inner {
    cache: CacheLayer,
    flush_delay: Duration,
    state: Mutex<CoalesceState>,
    /// Serializes flushes so writes of one key reach storage in order.
    flush_lock: tokio::sync::Mutex<()>,
    /// Held by repositories and the ledger across read-check-write.
    write_lock: tokio::sync::Mutex<()>,
    subscription: SubscriptionId,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CoalesceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn origin(&self) -> &str {
        self.cache.storage().origin()
    }

    /// Applies a change published by another instance.
    fn apply_external(&self, change: &StorageChange) {
        if change.origin == self.origin() {
            return;
        }

        let mut state = self.lock();
        state.generation += 1;
        match &change.key {
            Some(key) => {
                if state.pending.contains(key) {
                    debug!(key, "Ignoring external change to locally pending key");
                    return;
                }
                let parsed = change
                    .new_value
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
                match parsed {
                    Some(value) => {
                        state.memory.insert(key.clone(), Slot::Value(value));
                    }
                    None => {
                        state.memory.remove(key);
                    }
                }
            }
            None => {
                let CoalesceState { memory, pending, .. } = &mut *state;
                memory.retain(|key, _| pending.contains(key));
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cache.storage().bus().unsubscribe(self.subscription);
    }
}

// =============================================================================
// Write-Coalescing Store
// =============================================================================

/// The buffered read/write surface used by repositories.
///
/// Cloning is cheap; clones share the buffer.
#[derive(Clone)]
pub struct WriteCoalescingStore {
    inner: Arc<Inner>,
}

impl WriteCoalescingStore {
    /// Creates the store without preloading.
    pub fn new(cache: CacheLayer, flush_delay: Duration) -> Self {
        let bus = Arc::clone(cache.storage().bus());
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let subscription = bus.subscribe(move |change| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_external(change);
                }
            });
            Inner {
                cache,
                flush_delay,
                state: Mutex::new(CoalesceState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                write_lock: tokio::sync::Mutex::new(()),
                subscription,
            }
        });
        WriteCoalescingStore { inner }
    }

    /// Creates the store and loads the hot keys into memory.
    pub async fn open(cache: CacheLayer, flush_delay: Duration) -> Self {
        let store = Self::new(cache, flush_delay);
        store.preload().await;
        store
    }

    async fn preload(&self) {
        let mut loaded = 0;
        for key in HOT_KEYS {
            if self.get_value(key).await.is_some() {
                loaded += 1;
            }
        }
        debug!(loaded, "Preloaded hot keys");
    }

    pub fn storage(&self) -> &KeyValueStorage {
        self.inner.cache.storage()
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.inner.cache
    }

    pub fn flush_delay(&self) -> Duration {
        self.inner.flush_delay
    }

    /// Serializes read-modify-write sequences on this store.
    ///
    /// Not reentrant: code holding the guard must call the `*_locked`
    /// variants of repository writes.
    pub async fn write_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.write_lock.lock().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads and decodes `key`, from memory when resident.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "Stored value has unexpected shape");
                None
            }
        }
    }

    /// JSON form of [`get`](Self::get).
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let generation = {
            let state = self.inner.lock();
            match state.memory.get(key) {
                Some(Slot::Value(value)) => return Some(value.clone()),
                Some(Slot::Removed) => return None,
                None => state.generation,
            }
        };

        let fetched = self.inner.cache.get_value(key, true).await;

        let mut state = self.inner.lock();
        if let Some(value) = &fetched {
            // A local write or external change may have landed meanwhile.
            if state.generation == generation && !state.memory.contains_key(key) {
                state.memory.insert(key.to_string(), Slot::Value(value.clone()));
            }
        }
        match state.memory.get(key) {
            Some(Slot::Value(value)) => Some(value.clone()),
            Some(Slot::Removed) => None,
            None => fetched,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Buffers `value` under `key` and schedules a flush. `false` when the
    /// value cannot be serialized or the store is disposed.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.write(key, Slot::Value(value)),
            Err(e) => {
                error!(key, error = %e, "Failed to serialize value");
                false
            }
        }
    }

    pub fn set_value(&self, key: &str, value: Value) -> bool {
        self.write(key, Slot::Value(value))
    }

    /// Buffers a removal of `key` and schedules a flush.
    pub fn remove(&self, key: &str) -> bool {
        self.write(key, Slot::Removed)
    }

    fn write(&self, key: &str, slot: Slot) -> bool {
        let schedule = {
            let mut state = self.inner.lock();
            if state.disposed {
                warn!(key, "Write after dispose ignored");
                return false;
            }
            state.memory.insert(key.to_string(), slot);
            state.pending.insert(key.to_string());
            if state.flush_scheduled {
                false
            } else {
                state.flush_scheduled = true;
                true
            }
        };

        if schedule {
            self.schedule_flush();
        }
        true
    }

    fn schedule_flush(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(store.inner.flush_delay).await;
                    if let Err(e) = store.flush_changes().await {
                        error!(error = %e, "Scheduled flush failed");
                    }
                });
            }
            Err(_) => {
                warn!("No async runtime; buffered writes wait for an explicit flush");
                self.inner.lock().flush_scheduled = false;
            }
        }
    }

    /// Writes every pending key to storage.
    ///
    /// Keys that fail stay pending and the first error is returned. Returns
    /// the number of keys written.
    pub async fn flush_changes(&self) -> StoreResult<usize> {
        let _guard = self.inner.flush_lock.lock().await;

        let batch: Vec<(String, Slot)> = {
            let mut state = self.inner.lock();
            state.flush_scheduled = false;
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .filter_map(|key| state.memory.get(&key).cloned().map(|slot| (key, slot)))
                .collect()
        };

        if batch.is_empty() {
            return Ok(0);
        }

        let storage = self.storage();
        let mut written = 0;
        let mut first_error: Option<StoreError> = None;
        for (key, slot) in batch {
            let result = match &slot {
                Slot::Value(value) => storage.try_set(&key, value).await,
                Slot::Removed => storage.try_remove(&key).await,
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to flush key");
                    self.inner.lock().pending.insert(key);
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(written, "Flushed pending writes");
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Keys written in memory but not yet flushed.
    pub fn pending_keys(&self) -> Vec<String> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().pending.is_empty()
    }

    /// Drops every memory-resident value that is not pending.
    pub fn forget(&self, key: Option<&str>) {
        let mut state = self.inner.lock();
        state.generation += 1;
        let CoalesceState { memory, pending, .. } = &mut *state;
        match key {
            Some(key) if !pending.contains(key) => {
                memory.remove(key);
            }
            Some(_) => {}
            None => memory.retain(|k, _| pending.contains(k)),
        }
    }

    /// Flushes and stops accepting writes.
    pub async fn dispose(&self) -> StoreResult<()> {
        let result = self.flush_changes().await;
        self.inner.lock().disposed = true;
        info!(origin = %self.inner.origin(), "Write-coalescing store disposed");
        result.map(|_| ())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl std::fmt::Debug for WriteCoalescingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoalescingStore")
            .field("origin", &self.inner.origin())
            .field("pending", &self.pending_keys())
            .finish()
    }
}
