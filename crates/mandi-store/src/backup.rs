//! # Backup & Recovery
//!
//! Export/import of the ledger namespace and the emergency backup slots.
//!
//! ## Backup Document
//! ```text
//! {
//!   "timestamp": "2024-04-02T10:15:00+00:00",
//!   "data": {
//!     "purchases": [...], "sales": [...], "inventory": [...],
//!     "suppliers": [...], "locations": [...], "currentFinancialYear": "fy-…",
//!     ...
//!   }
//! }
//! ```
//!
//! ## Slots
//! ```text
//! ┌──────────────────────┬────────────────────────────────────────────────┐
//! │ emergencyBackup      │ latest export, written every backup interval,  │
//! │ emergencyBackupMirror│ on dispose and from the fatal-error hook       │
//! │ emergencyBackupTime  │ timestamp of the latest emergency backup       │
//! │ preFormatBackup      │ export taken before a reset; survives clear_all│
//! └──────────────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! Backup slots are written straight through the primitive so they are
//! durable when the call returns.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::coalesce::WriteCoalescingStore;
use crate::error::{StoreError, StoreResult};
use crate::keys::{self, DATA_KEYS, MASTER_KEYS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub timestamp: String,
    pub data: BTreeMap<String, Value>,
}

impl BackupDocument {
    /// Checks the shape of every entry before anything is written.
    ///
    /// Unknown keys are dropped with a warning. Collections only have to be
    /// arrays: elements that don't decode are kept, as the repositories
    /// keep them, and skipped on read.
    fn validated(mut self) -> StoreResult<Self> {
        let unknown: Vec<String> = self.data.keys().filter(|k| !keys::is_data_key(k)).cloned().collect();
        for key in &unknown {
            warn!(key = %key, "Ignoring unknown key in backup");
            self.data.remove(key);
        }

        for (key, value) in &self.data {
            let well_formed = match key.as_str() {
                keys::CURRENT_FINANCIAL_YEAR => matches!(value, Value::String(_) | Value::Null),
                _ => value.is_array(),
            };
            if !well_formed {
                let expected = if key == keys::CURRENT_FINANCIAL_YEAR { "a string" } else { "an array" };
                return Err(StoreError::InvalidBackup(format!("'{key}' must be {expected}")));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct BackupService {
    store: WriteCoalescingStore,
}

impl BackupService {
    pub fn new(store: WriteCoalescingStore) -> Self {
        BackupService { store }
    }

    // =========================================================================
    // Export / Import
    // =========================================================================

    /// Current value of every data key, buffered writes included.
    pub async fn snapshot_document(&self) -> BackupDocument {
        let mut data = BTreeMap::new();
        for key in DATA_KEYS {
            if let Some(value) = self.store.get_value(key).await {
                data.insert(key.to_string(), value);
            }
        }
        BackupDocument {
            timestamp: Utc::now().to_rfc3339(),
            data,
        }
    }

    /// The backup document as JSON text.
    pub async fn export_snapshot(&self) -> StoreResult<String> {
        let document = self.snapshot_document().await;
        serde_json::to_string(&document).map_err(|e| StoreError::serialization("backup", e))
    }

    /// Restores a backup document. `false` means it was rejected and nothing
    /// was written.
    pub async fn import_snapshot(&self, json: &str) -> bool {
        match self.try_import(json).await {
            Ok(count) => {
                info!(keys = count, "Backup imported");
                true
            }
            Err(e) => {
                error!(error = %e, "Backup import failed");
                false
            }
        }
    }

    /// Fallible form of [`import_snapshot`](Self::import_snapshot).
    /// Returns the number of keys written.
    pub async fn try_import(&self, json: &str) -> StoreResult<usize> {
        let document: BackupDocument =
            serde_json::from_str(json).map_err(|e| StoreError::InvalidBackup(e.to_string()))?;
        let document = document.validated()?;
        debug!(timestamp = %document.timestamp, keys = document.data.len(), "Importing backup");

        let count = document.data.len();
        let _guard = self.store.write_guard().await;
        for (key, value) in document.data {
            if !self.store.set_value(&key, value) {
                return Err(StoreError::ShuttingDown);
            }
        }
        self.store.flush_changes().await?;
        Ok(count)
    }

    // =========================================================================
    // Emergency Backups
    // =========================================================================

    /// Flushes, then writes the export into both emergency slots.
    pub async fn emergency_backup(&self) -> StoreResult<()> {
        if let Err(e) = self.store.flush_changes().await {
            warn!(error = %e, "Flush before emergency backup failed; backing up memory state");
        }
        let document = self.snapshot_document().await;
        let raw = serde_json::to_string(&document).map_err(|e| StoreError::serialization(keys::EMERGENCY_BACKUP, e))?;

        let storage = self.store.storage();
        storage.try_set_raw(keys::EMERGENCY_BACKUP, raw.clone()).await?;
        storage.try_set_raw(keys::EMERGENCY_BACKUP_MIRROR, raw).await?;
        storage.try_set(keys::EMERGENCY_BACKUP_TIME, &document.timestamp).await?;
        debug!(keys = document.data.len(), "Emergency backup written");
        Ok(())
    }

    /// When the last emergency backup was taken.
    pub async fn emergency_backup_time(&self) -> Option<String> {
        self.store.storage().get(keys::EMERGENCY_BACKUP_TIME).await
    }

    /// Imports the primary emergency slot, or the mirror when the primary
    /// is missing or unusable.
    pub async fn restore_emergency_backup(&self) -> StoreResult<usize> {
        let storage = self.store.storage();
        for slot in [keys::EMERGENCY_BACKUP, keys::EMERGENCY_BACKUP_MIRROR] {
            let raw = match storage.try_get_raw(slot).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(slot, error = %e, "Backup slot unreadable");
                    continue;
                }
            };
            match self.try_import(&raw).await {
                Ok(count) => {
                    info!(slot, keys = count, "Emergency backup restored");
                    return Ok(count);
                }
                Err(StoreError::InvalidBackup(reason)) => {
                    warn!(slot, reason = %reason, "Backup slot invalid, trying next");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::NoBackup)
    }

    /// Saves the export under `preFormatBackup` ahead of a reset.
    pub async fn pre_format_backup(&self) -> StoreResult<()> {
        let raw = self.export_snapshot().await?;
        self.store.storage().try_set_raw(keys::PRE_FORMAT_BACKUP, raw).await?;
        info!("Pre-format backup saved");
        Ok(())
    }

    pub async fn pre_format_backup_document(&self) -> Option<BackupDocument> {
        self.store.storage().get(keys::PRE_FORMAT_BACKUP).await
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Removes every data key, the emergency slots and any ledger intents.
    /// `preFormatBackup` is kept.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let _guard = self.store.write_guard().await;
        let intents: Vec<String> = self
            .store
            .storage()
            .keys()
            .await?
            .into_iter()
            .filter(|k| keys::is_intent_key(k))
            .collect();

        let mut targets: Vec<&str> = DATA_KEYS.to_vec();
        targets.extend([keys::EMERGENCY_BACKUP, keys::EMERGENCY_BACKUP_MIRROR, keys::EMERGENCY_BACKUP_TIME]);
        targets.extend(intents.iter().map(String::as_str));
        self.clear(&targets).await?;
        warn!("All ledger data cleared");
        Ok(())
    }

    /// Removes the master lists and locations only.
    pub async fn clear_master_data(&self) -> StoreResult<()> {
        let _guard = self.store.write_guard().await;
        self.clear(&MASTER_KEYS).await?;
        warn!("Master data cleared");
        Ok(())
    }

    async fn clear(&self, targets: &[&str]) -> StoreResult<()> {
        // Buffered writes would otherwise land after the removal.
        self.store.flush_changes().await?;
        self.store.storage().try_remove_many(targets).await?;
        self.store.forget(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::store;
    use serde_json::json;

    async fn seeded() -> (BackupService, WriteCoalescingStore) {
        let store = store().await;
        store.set_value(keys::PURCHASES, json!([{"id": "p1", "lotNumber": "LOT-1", "quantity": 10}]));
        store.set_value(keys::SUPPLIERS, json!([{"id": "supplier-1", "name": "Shree Traders"}]));
        store.set_value(keys::LOCATIONS, json!(["Godown A"]));
        store.set_value(keys::CURRENT_FINANCIAL_YEAR, json!("fy-1"));
        (BackupService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_export_includes_pending_writes() {
        let (backup, store) = seeded().await;
        assert!(store.has_pending());

        let document: BackupDocument = serde_json::from_str(&backup.export_snapshot().await.unwrap()).unwrap();
        assert_eq!(document.data.len(), 4);
        assert_eq!(document.data[keys::LOCATIONS], json!(["Godown A"]));
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_document_without_writing() {
        let (backup, store) = seeded().await;
        store.flush_changes().await.unwrap();

        let bad = json!({"timestamp": "t", "data": {"sales": [{"id": "s1"}], "purchases": {"id": "p9"}}});
        assert!(!backup.import_snapshot(&bad.to_string()).await);
        assert!(!backup.import_snapshot("not json").await);
        assert!(store.get_value(keys::SALES).await.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_keeps_undecodable_elements() {
        let (backup, source) = seeded().await;
        let legacy = json!([{"id": "p1"}, {"id": 1717000000000u64, "lotNumber": "OLD"}, "garbage"]);
        source.set_value(keys::PURCHASES, legacy.clone());
        let exported = backup.export_snapshot().await.unwrap();

        let target = store().await;
        assert_eq!(BackupService::new(target.clone()).try_import(&exported).await.unwrap(), 4);
        assert_eq!(target.get_value(keys::PURCHASES).await, Some(legacy));
        assert_eq!(target.get_value(keys::SUPPLIERS).await, source.get_value(keys::SUPPLIERS).await);
    }

    #[tokio::test]
    async fn test_import_ignores_unknown_keys() {
        let (backup, store) = seeded().await;
        let doc = json!({"timestamp": "t", "data": {"sales": [{"id": "s1"}], "theme": "dark"}});
        assert!(backup.import_snapshot(&doc.to_string()).await);
        assert_eq!(store.get_value(keys::SALES).await, Some(json!([{"id": "s1"}])));
        assert!(store.storage().try_get_raw("theme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_emergency_backup_falls_back_to_mirror() {
        let (backup, store) = seeded().await;
        backup.emergency_backup().await.unwrap();
        assert!(backup.emergency_backup_time().await.is_some());

        store.storage().try_set_raw(keys::EMERGENCY_BACKUP, "{corrupt".to_string()).await.unwrap();
        backup.clear_master_data().await.unwrap();
        assert!(store.get_value(keys::SUPPLIERS).await.is_none());

        assert_eq!(backup.restore_emergency_backup().await.unwrap(), 4);
        assert_eq!(store.get_value(keys::LOCATIONS).await, Some(json!(["Godown A"])));
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let backup = BackupService::new(store().await);
        assert!(matches!(backup.restore_emergency_backup().await, Err(StoreError::NoBackup)));
    }

    #[tokio::test]
    async fn test_clear_all_keeps_pre_format_backup() {
        let (backup, store) = seeded().await;
        backup.pre_format_backup().await.unwrap();
        backup.emergency_backup().await.unwrap();
        store.storage().try_set(&keys::intent_key("left-over"), &json!({})).await.unwrap();
        backup.clear_all().await.unwrap();

        for key in DATA_KEYS {
            assert!(store.get_value(key).await.is_none(), "{key} survived clear_all");
        }
        assert!(store.storage().try_get_raw(keys::EMERGENCY_BACKUP).await.unwrap().is_none());
        assert!(store.storage().try_get_raw(&keys::intent_key("left-over")).await.unwrap().is_none());
        let saved = backup.pre_format_backup_document().await.unwrap();
        assert_eq!(saved.data.len(), 4);
    }

    #[tokio::test]
    async fn test_clear_master_data_keeps_transactions() {
        let (backup, store) = seeded().await;
        backup.clear_master_data().await.unwrap();
        assert!(store.get_value(keys::SUPPLIERS).await.is_none());
        assert!(store.get_value(keys::LOCATIONS).await.is_none());
        assert!(store.get_value(keys::PURCHASES).await.is_some());
    }
}
