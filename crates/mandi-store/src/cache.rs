//! # Cache Layer
//!
//! Short-lived in-memory copies of decoded storage values.
//!
//! ```text
//! get_cached(key, use_cache)
//!     │
//!     ├── fresh entry (younger than TTL) ──► serve from memory
//!     │
//!     └── otherwise ──► KeyValueStorage::get
//!                          ├── hit  ──► populate, serve
//!                          └── miss ──► evict, None
//!
//! ChangeBus ──► invalidate(key)  or  invalidate(None) for key-less changes
//! ```
//!
//! Invalidation runs inside the publishing call, including for changes made
//! by this same instance. A read racing a write cannot re-populate the cache
//! with the value it read before the write: every invalidation bumps a
//! generation counter and stale populations are dropped.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::kv::KeyValueStorage;
use crate::notify::SubscriptionId;

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    generation: u64,
}

impl CacheState {
    fn invalidate(&mut self, key: Option<&str>) {
        self.generation += 1;
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => self.entries.clear(),
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// TTL read cache in front of a [`KeyValueStorage`].
pub struct CacheLayer {
    storage: KeyValueStorage,
    ttl: Duration,
    state: Arc<Mutex<CacheState>>,
    subscription: SubscriptionId,
}

impl CacheLayer {
    /// Creates the cache and subscribes it to the storage's change bus.
    pub fn new(storage: KeyValueStorage, ttl: Duration) -> Self {
        let state = Arc::new(Mutex::new(CacheState::default()));
        let weak: Weak<Mutex<CacheState>> = Arc::downgrade(&state);

        let subscription = storage.bus().subscribe(move |change| {
            if let Some(state) = weak.upgrade() {
                trace!(key = ?change.key, "Cache invalidated by change");
                lock(&state).invalidate(change.key.as_deref());
            }
        });

        CacheLayer {
            storage,
            ttl,
            state,
            subscription,
        }
    }

    pub fn storage(&self) -> &KeyValueStorage {
        &self.storage
    }

    /// Reads `key`, from memory when `use_cache` and a fresh entry exist.
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str, use_cache: bool) -> Option<T> {
        let value = self.get_value(key, use_cache).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Raw JSON form of [`get_cached`](Self::get_cached).
    pub async fn get_value(&self, key: &str, use_cache: bool) -> Option<Value> {
        let generation = {
            let state = lock(&self.state);
            if use_cache {
                if let Some(entry) = state.entries.get(key) {
                    if entry.stored_at.elapsed() < self.ttl {
                        return Some(entry.value.clone());
                    }
                }
            }
            state.generation
        };

        let fetched: Option<Value> = self.storage.get(key).await;

        let mut state = lock(&self.state);
        if state.generation == generation {
            match &fetched {
                Some(value) => {
                    state.entries.insert(
                        key.to_string(),
                        CacheEntry {
                            value: value.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                }
                None => {
                    state.entries.remove(key);
                }
            }
        }
        fetched
    }

    /// Drops one entry, or every entry for `None`.
    pub fn invalidate(&self, key: Option<&str>) {
        lock(&self.state).invalidate(key);
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CacheLayer {
    fn drop(&mut self) {
        self.storage.bus().unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::kv::open_pool;
    use crate::notify::ChangeBus;
    use serde_json::json;

    async fn cache(ttl: Duration) -> CacheLayer {
        let pool = open_pool(&LedgerConfig::in_memory()).await.unwrap();
        CacheLayer::new(KeyValueStorage::new(pool, ChangeBus::new(), "tab-1"), ttl)
    }

    #[tokio::test]
    async fn test_latest_write_wins_within_ttl() {
        let cache = cache(Duration::from_secs(30)).await;
        let kv = cache.storage().clone();

        kv.set("k", &json!("v1")).await;
        assert_eq!(cache.get_cached::<String>("k", true).await.as_deref(), Some("v1"));

        kv.set("k", &json!("v2")).await;
        assert_eq!(cache.get_cached::<String>("k", true).await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_sibling_write_invalidates() {
        let cache = cache(Duration::from_secs(30)).await;
        let sibling = KeyValueStorage::new(cache.storage().pool().clone(), Arc::clone(cache.storage().bus()), "tab-2");

        cache.storage().set("k", &1).await;
        assert_eq!(cache.get_cached::<i64>("k", true).await, Some(1));
        assert_eq!(cache.len(), 1);

        sibling.set("k", &2).await;
        assert!(cache.is_empty());
        assert_eq!(cache.get_cached::<i64>("k", true).await, Some(2));
    }

    #[tokio::test]
    async fn test_miss_evicts_and_keyless_change_clears() {
        let cache = cache(Duration::from_secs(30)).await;
        let kv = cache.storage().clone();

        kv.set("a", &1).await;
        kv.set("b", &2).await;
        cache.get_cached::<i64>("a", true).await;
        cache.get_cached::<i64>("b", true).await;
        assert_eq!(cache.len(), 2);

        kv.clear_namespace().await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.get_cached::<i64>("a", true).await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_reread() {
        let cache = cache(Duration::from_millis(20)).await;
        cache.storage().set("k", &1).await;
        assert_eq!(cache.get_cached::<i64>("k", true).await, Some(1));

        // Bypass the bus so only expiry can refresh the entry.
        sqlx::query("UPDATE kv_store SET value = '5' WHERE key = 'k'")
            .execute(cache.storage().pool())
            .await
            .unwrap();
        assert_eq!(cache.get_cached::<i64>("k", true).await, Some(1));
        assert_eq!(cache.get_cached::<i64>("k", false).await, Some(5));

        sqlx::query("UPDATE kv_store SET value = '6' WHERE key = 'k'")
            .execute(cache.storage().pool())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get_cached::<i64>("k", true).await, Some(6));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let cache = cache(Duration::from_secs(30)).await;
        let bus = Arc::clone(cache.storage().bus());
        assert_eq!(bus.subscriber_count(), 1);
        drop(cache);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
