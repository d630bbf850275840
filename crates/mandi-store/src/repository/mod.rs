//! # Repository Module
//!
//! Typed access to the ledger collections.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  engine.purchases().get_active()                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Collection<Purchase>                                                  │
//! │  ├── get_all / get_active / get                                        │
//! │  ├── add / update (JSON patch) / soft_delete                           │
//! │  └── upsert (typed rows merged into the stored array)                  │
//! │       │                                                                 │
//! │       │  read-modify-write of one JSON array                            │
//! │       ▼                                                                 │
//! │  WriteCoalescingStore  ──►  KeyValueStorage                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Raw Arrays
//! Writes operate on the stored JSON array, not on a re-serialized typed
//! list. Fields the UI wrote that the Rust types don't know survive every
//! update, and an element that fails to decode is skipped by reads but never
//! dropped by writes.
//!
//! ## Available Repositories
//!
//! - [`Collection`] - Purchases, sales, payments, receipts, inventory
//! - [`MasterRepository`] - Suppliers, customers, brokers, agents, transporters
//! - [`LocationRepository`] - Storage locations
//! - [`FinancialYearRepository`] - Financial years and the current one

pub mod financial_year;
pub mod location;
pub mod master;

pub use financial_year::FinancialYearRepository;
pub use location::LocationRepository;
pub use master::{MasterRepository, MasterStrategy, NewMaster, MASTER_STRATEGIES};

use mandi_core::{CoreError, Record, ValidationError};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::coalesce::WriteCoalescingStore;
use crate::error::{StoreError, StoreResult};

/// Purchases collection.
pub type PurchaseRepository = Collection<mandi_core::Purchase>;
/// Sales collection.
pub type SaleRepository = Collection<mandi_core::Sale>;
/// Payments and receipts collections.
pub type PaymentRepository = Collection<mandi_core::Payment>;
/// Inventory rows.
pub type InventoryRepository = Collection<mandi_core::InventoryItem>;

/// Id of a raw array element.
pub(crate) fn element_id(element: &Value) -> Option<&str> {
    element.get("id").and_then(Value::as_str)
}

/// Overlays the fields of `patch` onto `target`. The `id` field never changes.
pub(crate) fn merge_fields(target: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = target {
        for (name, value) in patch {
            if name != "id" {
                fields.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Merges typed records into a raw array by id: matched elements get the
/// record's fields overlaid, unmatched records are appended.
pub(crate) fn merge_records<T: Record>(mut raw: Vec<Value>, records: &[T]) -> StoreResult<Vec<Value>> {
    for record in records {
        let encoded = serde_json::to_value(record).map_err(|e| StoreError::serialization(T::ENTITY, e))?;
        match raw.iter_mut().find(|el| element_id(el) == Some(record.id())) {
            Some(existing) => {
                if let Value::Object(fields) = &encoded {
                    merge_fields(existing, fields);
                }
            }
            None => raw.push(encoded),
        }
    }
    Ok(raw)
}

/// Decodes the elements of a raw array, skipping the ones that don't fit `T`.
pub(crate) fn decode_elements<T: Record>(key: &str, raw: &[Value]) -> Vec<T> {
    raw.iter()
        .filter_map(|element| match serde_json::from_value::<T>(element.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, id = ?element_id(element), error = %e, "Skipping undecodable {}", T::ENTITY);
                None
            }
        })
        .collect()
}

// =============================================================================
// Collection
// =============================================================================

/// A JSON array of `T` stored under one key.
pub struct Collection<T> {
    store: WriteCoalescingStore,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            store: self.store.clone(),
            key: self.key,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("key", &self.key).finish()
    }
}

impl<T: Record> Collection<T> {
    pub fn new(store: WriteCoalescingStore, key: &'static str) -> Self {
        Collection {
            store,
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// The stored array as JSON. Anything that isn't an array reads as empty.
    pub async fn raw(&self) -> Vec<Value> {
        match self.store.get_value(self.key).await {
            Some(Value::Array(elements)) => elements,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(key = self.key, kind = %json_kind(&other), "Collection is not an array, reading as empty");
                Vec::new()
            }
        }
    }

    /// Every record, soft-deleted ones included.
    pub async fn get_all(&self) -> Vec<T> {
        decode_elements(self.key, &self.raw().await)
    }

    /// Records that are not soft-deleted.
    pub async fn get_active(&self) -> Vec<T> {
        self.get_all().await.into_iter().filter(|r| r.is_active()).collect()
    }

    /// A record by id, soft-deleted or not.
    pub async fn get(&self, id: &str) -> Option<T> {
        self.get_all().await.into_iter().find(|r| r.id() == id)
    }

    /// An active record by id, or `NotFound`.
    pub async fn require_active(&self, id: &str) -> StoreResult<T> {
        self.get(id)
            .await
            .filter(|r| r.is_active())
            .ok_or_else(|| CoreError::not_found(T::ENTITY, id).into())
    }

    /// Appends `item`. Rejects an id that is already present.
    pub async fn add(&self, item: T) -> StoreResult<T> {
        let _guard = self.store.write_guard().await;
        self.add_locked(item).await
    }

    pub(crate) async fn add_locked(&self, item: T) -> StoreResult<T> {
        if item.id().trim().is_empty() {
            return Err(ValidationError::Required { field: "id".to_string() }.into());
        }
        let mut raw = self.raw().await;
        if raw.iter().any(|el| element_id(el) == Some(item.id())) {
            return Err(ValidationError::Duplicate {
                field: format!("{} id", T::ENTITY),
                value: item.id().to_string(),
            }
            .into());
        }

        raw.push(serde_json::to_value(&item).map_err(|e| StoreError::serialization(self.key, e))?);
        self.write(raw)?;
        debug!(key = self.key, id = item.id(), "Added {}", T::ENTITY);
        Ok(item)
    }

    /// Applies a partial JSON object to the record with `id`.
    ///
    /// The merged record must still decode as `T`; otherwise nothing is
    /// written.
    pub async fn update(&self, id: &str, patch: Value) -> StoreResult<T> {
        let _guard = self.store.write_guard().await;
        self.update_locked(id, patch).await
    }

    pub(crate) async fn update_locked(&self, id: &str, patch: Value) -> StoreResult<T> {
        let Value::Object(fields) = patch else {
            return Err(ValidationError::InvalidFormat {
                field: "patch".to_string(),
                reason: "must be a JSON object".to_string(),
            }
            .into());
        };

        let mut raw = self.raw().await;
        let element = raw
            .iter_mut()
            .find(|el| element_id(el) == Some(id))
            .ok_or_else(|| CoreError::not_found(T::ENTITY, id))?;
        merge_fields(element, &fields);
        let updated: T = serde_json::from_value(element.clone()).map_err(|e| StoreError::serialization(self.key, e))?;

        self.write(raw)?;
        debug!(key = self.key, id, "Updated {}", T::ENTITY);
        Ok(updated)
    }

    /// Marks the record deleted. It stays in storage.
    pub async fn soft_delete(&self, id: &str) -> StoreResult<()> {
        let _guard = self.store.write_guard().await;
        let mut raw = self.raw().await;
        let element = raw
            .iter_mut()
            .find(|el| element_id(el) == Some(id))
            .ok_or_else(|| CoreError::not_found(T::ENTITY, id))?;
        if let Value::Object(fields) = element {
            fields.insert("isDeleted".to_string(), Value::Bool(true));
        }

        self.write(raw)?;
        debug!(key = self.key, id, "Soft-deleted {}", T::ENTITY);
        Ok(())
    }

    /// Merges typed records into the stored array by id and writes it.
    pub async fn upsert(&self, records: &[T]) -> StoreResult<()> {
        let _guard = self.store.write_guard().await;
        let merged = merge_records(self.raw().await, records)?;
        self.write(merged)
    }

    /// Array that [`upsert`](Self::upsert) would write, without writing it.
    pub async fn merged_with(&self, records: &[T]) -> StoreResult<Vec<Value>> {
        merge_records(self.raw().await, records)
    }

    pub(crate) fn store(&self) -> &WriteCoalescingStore {
        &self.store
    }

    fn write(&self, raw: Vec<Value>) -> StoreResult<()> {
        if self.store.set_value(self.key, Value::Array(raw)) {
            Ok(())
        } else {
            Err(StoreError::ShuttingDown)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::store;
    use super::*;
    use mandi_core::{Purchase, Sale};
    use serde_json::json;

    fn sale(id: &str) -> Sale {
        serde_json::from_value(json!({"id": id, "lotNumber": "LOT-1", "totalAmount": 1000})).unwrap()
    }

    #[tokio::test]
    async fn test_add_get_and_soft_delete() {
        let sales = SaleRepository::new(store().await, "sales");
        sales.add(sale("s1")).await.unwrap();
        sales.add(sale("s2")).await.unwrap();

        sales.soft_delete("s1").await.unwrap();

        let active: Vec<String> = sales.get_active().await.into_iter().map(|s| s.id).collect();
        let all: Vec<String> = sales.get_all().await.into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["s2"]);
        assert_eq!(all, vec!["s1", "s2"]);
        assert!(sales.get("s1").await.unwrap().is_deleted);
        assert!(sales.require_active("s1").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let sales = SaleRepository::new(store().await, "sales");
        sales.add(sale("s1")).await.unwrap();
        assert!(matches!(
            sales.add(sale("s1")).await,
            Err(StoreError::Core(CoreError::Validation(ValidationError::Duplicate { .. })))
        ));
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_unknown_fields() {
        let store = store().await;
        store.set_value(
            "purchases",
            json!([{"id": "p1", "lotNumber": "LOT-1", "quantity": 10, "uiNote": "keep me"}]),
        );
        let purchases = PurchaseRepository::new(store.clone(), "purchases");

        let updated = purchases
            .update("p1", json!({"quantity": "12", "id": "hijack"}))
            .await
            .unwrap();
        assert_eq!(updated.id, "p1");
        assert_eq!(updated.quantity, 12.0);

        let raw = purchases.raw().await;
        assert_eq!(raw[0]["uiNote"], json!("keep me"));
        assert_eq!(raw[0]["id"], json!("p1"));
    }

    #[tokio::test]
    async fn test_update_rejects_non_object_and_unknown_id() {
        let purchases = PurchaseRepository::new(store().await, "purchases");
        assert!(purchases.update("p1", json!([1])).await.is_err());
        assert!(matches!(
            purchases.update("p1", json!({"quantity": 1})).await,
            Err(StoreError::Core(CoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_elements_are_skipped_but_kept() {
        let store = store().await;
        store.set_value("purchases", json!([{"id": "p1"}, {"noId": true}, "garbage"]));
        let purchases = PurchaseRepository::new(store.clone(), "purchases");

        assert_eq!(purchases.get_all().await.len(), 1);

        let mut p: Purchase = purchases.get("p1").await.unwrap();
        p.quantity = 5.0;
        purchases.upsert(&[p]).await.unwrap();
        assert_eq!(purchases.raw().await.len(), 3);
    }

    #[tokio::test]
    async fn test_non_array_reads_as_empty() {
        let store = store().await;
        store.set_value("sales", json!({"oops": true}));
        let sales = SaleRepository::new(store, "sales");
        assert!(sales.get_all().await.is_empty());
    }
}
