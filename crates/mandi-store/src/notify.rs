//! # Change Bus
//!
//! Every mutation of the key-value namespace is announced here. It stands in
//! for the cross-tab storage event: all engines opened on the same database
//! share one bus.
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  KeyValueStorage::set("sales", …)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ChangeBus::publish(StorageChange { key, new_value, origin })           │
//! │       │                                                                 │
//! │       ├──► callbacks (synchronous, before `set` returns)               │
//! │       │      CacheLayer::invalidate        (every instance)             │
//! │       │      WriteCoalescingStore::apply   (other instances)            │
//! │       │                                                                 │
//! │       └──► broadcast::Sender (asynchronous, UI observers)              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Synchronous callbacks keep the read cache coherent: once `set` returns,
//! no instance can serve the old value.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the UI broadcast channel. Lagging receivers skip ahead.
const BROADCAST_CAPACITY: usize = 256;

/// A mutation notice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    /// Changed key; `None` means everything may have changed.
    pub key: Option<String>,
    /// Serialized new value; `None` for removals.
    pub new_value: Option<String>,
    /// Instance id of the engine that made the change.
    pub origin: String,
}

impl StorageChange {
    /// True when this change may affect `key`.
    pub fn affects(&self, key: &str) -> bool {
        self.key.as_deref().map(|k| k == key).unwrap_or(true)
    }
}

/// Handle returned by [`ChangeBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StorageChange) + Send + Sync>;

/// Observer registry shared by every engine on one database.
pub struct ChangeBus {
    callbacks: RwLock<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<StorageChange>,
}

impl ChangeBus {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(ChangeBus {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        })
    }

    /// Registers a callback run synchronously on every publish.
    pub fn subscribe(&self, callback: impl Fn(&StorageChange) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(sub, _)| *sub != id);
    }

    /// Async stream of changes for UI observers.
    pub fn watch(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: StorageChange) {
        trace!(key = ?change.key, origin = %change.origin, "Publishing storage change");

        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&change);
        }

        // No receivers is fine.
        let _ = self.sender.send(change);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
