//! # Key-Value Storage Primitive
//!
//! Durable string-keyed JSON storage with change notifications.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Key-Value Storage                                  │
//! │                                                                         │
//! │  get::<T>(key)  ──► SELECT value FROM kv_store ──► serde_json ──► T    │
//! │                                                                         │
//! │  set(key, &T)   ──► serde_json ──► UPSERT kv_store ──► ChangeBus       │
//! │                                                                         │
//! │  remove(key)    ──► DELETE FROM kv_store ──► ChangeBus (newValue null) │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │  kv_store                                │                           │
//! │  │  key TEXT PRIMARY KEY                    │                           │
//! │  │  value TEXT NOT NULL   (JSON document)   │                           │
//! │  │  updated_at TEXT NOT NULL (RFC 3339)     │                           │
//! │  └─────────────────────────────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Model
//! `get` / `set` / `remove` never return errors: failures are logged and
//! reported as `None` / `false`. The `try_*` variants return [`StoreResult`]
//! for callers that must know why (backups, the intent log).

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::error::{StoreError, StoreResult};
use crate::notify::{ChangeBus, StorageChange};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Opens the SQLite pool described by `config` and ensures the table exists.
///
/// File databases use WAL mode. `:memory:` databases use a single pinned
/// connection so every engine on the pool sees the same data.
pub async fn open_pool(config: &LedgerConfig) -> StoreResult<SqlitePool> {
    info!(path = %config.database_path.display(), "Opening ledger database");

    let pool = if config.is_in_memory() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
    } else {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            }
        }

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            // Readers don't block the flush writer
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
    };

    sqlx::query(SCHEMA).execute(&pool).await?;
    debug!("kv_store table ready");
    Ok(pool)
}

// =============================================================================
// Key-Value Storage
// =============================================================================

/// The storage primitive of one engine instance.
///
/// Cloning is cheap; clones share the pool, the bus and the origin id.
#[derive(Clone)]
pub struct KeyValueStorage {
    pool: SqlitePool,
    bus: Arc<ChangeBus>,
    origin: String,
}

impl KeyValueStorage {
    pub fn new(pool: SqlitePool, bus: Arc<ChangeBus>, origin: impl Into<String>) -> Self {
        KeyValueStorage {
            pool,
            bus,
            origin: origin.into(),
        }
    }

    /// Instance id stamped on every change this primitive publishes.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads and decodes `key`. Absence and decode failures are `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Storage read failed");
                None
            }
        }
    }

    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.try_get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::serialization(key, e)),
            None => Ok(None),
        }
    }

    /// Stored JSON text of `key`.
    pub async fn try_get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// Every stored key, sorted.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("key")).collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Serializes and stores `value`, then notifies. `false` on any failure.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "Storage write failed");
                false
            }
        }
    }

    pub async fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::serialization(key, e))?;
        self.try_set_raw(key, raw).await
    }

    /// Stores already-serialized JSON text, then notifies.
    pub async fn try_set_raw(&self, key: &str, raw: String) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(key, bytes = raw.len(), "Stored value");
        self.notify(Some(key), Some(raw));
        Ok(())
    }

    /// Deletes `key`, then notifies with a null value. `false` on failure.
    pub async fn remove(&self, key: &str) -> bool {
        match self.try_remove(key).await {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "Storage remove failed");
                false
            }
        }
    }

    pub async fn try_remove(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        debug!(key, "Removed value");
        self.notify(Some(key), None);
        Ok(())
    }

    /// Deletes several keys in one transaction and publishes a single
    /// key-less notification.
    pub async fn try_remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(*key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(count = keys.len(), "Removed keys");
        self.notify(None, None);
        Ok(())
    }

    /// Deletes every key and publishes a key-less notification.
    pub async fn clear_namespace(&self) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM kv_store").execute(&self.pool).await?;
        warn!(removed = result.rows_affected(), "Cleared storage namespace");
        self.notify(None, None);
        Ok(())
    }

    fn notify(&self, key: Option<&str>, new_value: Option<String>) {
        self.bus.publish(StorageChange {
            key: key.map(str::to_string),
            new_value,
            origin: self.origin.clone(),
        });
    }
}

impl std::fmt::Debug for KeyValueStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStorage")
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    async fn storage() -> KeyValueStorage {
        let pool = open_pool(&LedgerConfig::in_memory()).await.unwrap();
        KeyValueStorage::new(pool, ChangeBus::new(), "tab-1")
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let kv = storage().await;

        assert!(kv.set("empty", &json!([])).await);
        assert_eq!(kv.get::<Value>("empty").await, Some(json!([])));

        let nested = json!({"a": {"b": [1, 2, {"c": null}]}, "s": "x"});
        assert!(kv.set("nested", &nested).await);
        assert_eq!(kv.get::<Value>("nested").await, Some(nested));

        assert!(kv.set("nested", &json!(42)).await);
        assert_eq!(kv.get::<i64>("nested").await, Some(42));
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_values_are_none() {
        let kv = storage().await;
        assert_eq!(kv.get::<Value>("nothing").await, None);

        kv.try_set_raw("broken", "{not json".to_string()).await.unwrap();
        assert_eq!(kv.get::<Value>("broken").await, None);
        assert!(matches!(
            kv.try_get::<Value>("broken").await,
            Err(StoreError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_publish_changes() {
        let kv = storage().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        kv.bus().subscribe(move |c| sink.lock().unwrap().push(c.clone()));

        kv.set("sales", &json!([1])).await;
        kv.remove("sales").await;
        kv.clear_namespace().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].key.as_deref(), Some("sales"));
        assert_eq!(seen[0].new_value.as_deref(), Some("[1]"));
        assert_eq!(seen[0].origin, "tab-1");
        assert_eq!(seen[1].new_value, None);
        assert_eq!(seen[2].key, None);
    }

    #[tokio::test]
    async fn test_keys_and_remove_many() {
        let kv = storage().await;
        kv.set("b", &1).await;
        kv.set("a", &2).await;
        kv.set("c", &3).await;
        assert_eq!(kv.keys().await.unwrap(), vec!["a", "b", "c"]);

        kv.try_remove_many(&["a", "c"]).await.unwrap();
        assert_eq!(kv.keys().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_closed_pool_degrades_to_defaults() {
        let kv = storage().await;
        kv.pool().close().await;
        assert!(!kv.set("k", &1).await);
        assert_eq!(kv.get::<i64>("k").await, None);
        assert!(kv.try_get_raw("k").await.is_err());
    }
}
