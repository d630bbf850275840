//! # Intent Log
//!
//! Write-ahead record for ledger operations that touch more than one key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  commit("transfer", {inventory: [...]})                                 │
//! │     1. ledgerIntent:<id> = {id, kind, createdAt, writes}  (durable)     │
//! │     2. store.set_value(k, v) for every write                            │
//! │     3. store.flush_changes()                                            │
//! │     4. remove ledgerIntent:<id>                                         │
//! │                                                                         │
//! │  open ──► any ledgerIntent:* ? ──yes──► replay 2-4, oldest first        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each write carries the full new value of its key, so replaying an intent
//! that was already partly applied yields the same end state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coalesce::WriteCoalescingStore;
use crate::error::{StoreError, StoreResult};
use crate::keys;

/// A pending multi-key write as persisted under `ledgerIntent:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerIntent {
    pub id: String,
    /// Operation name, for logs.
    pub kind: String,
    pub created_at: String,
    /// Full new value per key.
    pub writes: BTreeMap<String, Value>,
}

impl LedgerIntent {
    pub fn new(kind: impl Into<String>, writes: BTreeMap<String, Value>) -> Self {
        LedgerIntent {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            created_at: Utc::now().to_rfc3339(),
            writes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentLog {
    store: WriteCoalescingStore,
}

impl IntentLog {
    pub fn new(store: WriteCoalescingStore) -> Self {
        IntentLog { store }
    }

    /// Records the intent, applies it, and clears it.
    ///
    /// If recording fails nothing is written. If applying fails the intent
    /// stays behind for [`recover`](Self::recover).
    pub async fn commit(&self, kind: &str, writes: BTreeMap<String, Value>) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let intent = LedgerIntent::new(kind, writes);
        let key = keys::intent_key(&intent.id);
        self.store.storage().try_set(&key, &intent).await?;
        debug!(id = %intent.id, kind, keys = intent.writes.len(), "Intent recorded");

        self.apply(&intent).await?;
        self.store.storage().try_remove(&key).await?;
        Ok(())
    }

    /// Rolls forward every intent left behind by an interrupted commit,
    /// oldest first.
    ///
    /// Returns the replayed intents. Unreadable intents are discarded.
    pub async fn recover(&self) -> StoreResult<Vec<LedgerIntent>> {
        let storage = self.store.storage();
        let mut pending = Vec::new();
        for key in storage.keys().await?.into_iter().filter(|k| keys::is_intent_key(k)) {
            match storage.try_get::<LedgerIntent>(&key).await {
                Ok(Some(intent)) => pending.push((key, intent)),
                Ok(None) => {}
                Err(StoreError::Serialization { message, .. }) => {
                    error!(key = %key, error = %message, "Discarding unreadable ledger intent");
                    storage.try_remove(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }
        pending.sort_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at));

        let mut replayed = Vec::with_capacity(pending.len());
        for (key, intent) in pending {
            warn!(id = %intent.id, kind = %intent.kind, created_at = %intent.created_at, "Replaying interrupted ledger operation");
            self.apply(&intent).await?;
            storage.try_remove(&key).await?;
            info!(id = %intent.id, "Ledger intent rolled forward");
            replayed.push(intent);
        }
        Ok(replayed)
    }

    async fn apply(&self, intent: &LedgerIntent) -> StoreResult<()> {
        for (key, value) in &intent.writes {
            if !self.store.set_value(key, value.clone()) {
                return Err(StoreError::ShuttingDown);
            }
        }
        self.store.flush_changes().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::store;
    use serde_json::json;

    fn writes(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_commit_applies_and_clears() {
        let store = store().await;
        let log = IntentLog::new(store.clone());
        log.commit(
            "test",
            writes(&[("inventory", json!([{"id": "inv-1"}])), ("purchases", json!([]))]),
        )
        .await
        .unwrap();

        assert!(!store.has_pending());
        let stored: Option<Value> = store.storage().get("inventory").await;
        assert_eq!(stored, Some(json!([{"id": "inv-1"}])));
        let keys = store.storage().keys().await.unwrap();
        assert!(!keys.iter().any(|k| keys::is_intent_key(k)));
    }

    #[tokio::test]
    async fn test_recover_replays_leftover_intents_in_order() {
        let store = store().await;
        let mut older = LedgerIntent::new("transfer", writes(&[("inventory", json!([{"id": "inv-1"}]))]));
        older.created_at = "2024-04-01T10:00:00+00:00".to_string();
        let mut newer = LedgerIntent::new("record_sale", writes(&[("inventory", json!([{"id": "inv-2"}]))]));
        newer.created_at = "2024-04-01T10:00:01+00:00".to_string();
        store.storage().try_set(&keys::intent_key(&newer.id), &newer).await.unwrap();
        store.storage().try_set(&keys::intent_key(&older.id), &older).await.unwrap();

        let log = IntentLog::new(store.clone());
        let replayed: Vec<String> = log.recover().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(replayed, vec![older.id, newer.id]);
        assert_eq!(store.get_value("inventory").await, Some(json!([{"id": "inv-2"}])));
        assert!(log.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_leaves_other_instances_intent_alone() {
        let store = store().await;
        let foreign = LedgerIntent::new("transfer", writes(&[("sales", json!([{"id": "s1"}]))]));
        let foreign_key = keys::intent_key(&foreign.id);
        store.storage().try_set(&foreign_key, &foreign).await.unwrap();

        let log = IntentLog::new(store.clone());
        log.commit("test", writes(&[("inventory", json!([]))])).await.unwrap();

        let kept: Option<LedgerIntent> = store.storage().get(&foreign_key).await;
        assert_eq!(kept.map(|i| i.id), Some(foreign.id));
    }

    #[tokio::test]
    async fn test_recover_reads_bare_key() {
        let store = store().await;
        let intent = LedgerIntent::new("transfer", writes(&[("inventory", json!([{"id": "inv-9"}]))]));
        store.storage().try_set(keys::LEDGER_INTENT, &intent).await.unwrap();

        let replayed = IntentLog::new(store.clone()).recover().await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(store.storage().try_get_raw(keys::LEDGER_INTENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_intent_is_discarded() {
        let store = store().await;
        let key = keys::intent_key("broken");
        store.storage().try_set_raw(&key, "{not json".to_string()).await.unwrap();

        let log = IntentLog::new(store.clone());
        assert!(log.recover().await.unwrap().is_empty());
        assert!(store.storage().try_get_raw(&key).await.unwrap().is_none());
    }
}
