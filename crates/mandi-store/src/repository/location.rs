//! Storage locations (godowns, shops, cold stores).
//!
//! Stored under `locations` as a JSON array of names. Older data holds
//! `{ "name": … }` objects; both forms are read.

use mandi_core::validation::{ensure_unique_name, validate_name};
use serde_json::Value;
use tracing::{info, warn};

use crate::coalesce::WriteCoalescingStore;
use crate::error::{StoreError, StoreResult};
use crate::keys;

#[derive(Debug, Clone)]
pub struct LocationRepository {
    store: WriteCoalescingStore,
}

impl LocationRepository {
    pub fn new(store: WriteCoalescingStore) -> Self {
        LocationRepository { store }
    }

    /// Location names in stored order.
    pub async fn list(&self) -> Vec<String> {
        let Some(value) = self.store.get_value(keys::LOCATIONS).await else {
            return Vec::new();
        };
        let Value::Array(elements) = value else {
            warn!("locations is not an array, reading as empty");
            return Vec::new();
        };

        elements
            .iter()
            .filter_map(|element| match element {
                Value::String(name) => Some(name.trim().to_string()),
                Value::Object(fields) => fields
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|name| name.trim().to_string()),
                _ => None,
            })
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.list().await.iter().any(|l| l.eq_ignore_ascii_case(name.trim()))
    }

    /// Appends a location; names are unique case-insensitively.
    pub async fn add(&self, name: &str) -> StoreResult<String> {
        let name = validate_name("location", name)?;
        let _guard = self.store.write_guard().await;
        let mut locations = self.list().await;
        ensure_unique_name("location", &name, locations.iter().map(String::as_str))?;

        locations.push(name.clone());
        self.write(locations)?;
        info!(location = %name, "Location added");
        Ok(name)
    }

    /// Removes a location from the list. Inventory rows keep their location
    /// string.
    pub async fn remove(&self, name: &str) -> StoreResult<bool> {
        let _guard = self.store.write_guard().await;
        let mut locations = self.list().await;
        let before = locations.len();
        locations.retain(|l| !l.eq_ignore_ascii_case(name.trim()));
        if locations.len() == before {
            return Ok(false);
        }
        self.write(locations)?;
        info!(location = %name, "Location removed");
        Ok(true)
    }

    fn write(&self, locations: Vec<String>) -> StoreResult<()> {
        if self.store.set(keys::LOCATIONS, &locations) {
            Ok(())
        } else {
            Err(StoreError::ShuttingDown)
        }
    }
}
