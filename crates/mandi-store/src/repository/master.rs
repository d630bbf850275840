//! # Master Repository
//!
//! Suppliers, customers, brokers, agents and transporters.
//!
//! Each party type is one entry of a static strategy table: its storage key,
//! its id prefix and its default commission. The repository itself is the
//! same for all five.
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────┬────────────────────┐
//! │ PartyType    │ key          │ id prefix   │ default commission │
//! ├──────────────┼──────────────┼─────────────┼────────────────────┤
//! │ Supplier     │ suppliers    │ supplier-   │ -                  │
//! │ Customer     │ customers    │ customer-   │ -                  │
//! │ Broker       │ brokers      │ broker-     │ 1%                 │
//! │ Agent        │ agents       │ agent-      │ 1%                 │
//! │ Transporter  │ transporters │ transporter-│ -                  │
//! └──────────────┴──────────────┴─────────────┴────────────────────┘
//! ```

use chrono::Utc;
use mandi_core::validation::{ensure_unique_name, validate_commission_rate, validate_name};
use mandi_core::{generate_id, Master, PartyType, Record, DEFAULT_COMMISSION_RATE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::Collection;
use crate::coalesce::WriteCoalescingStore;
use crate::error::StoreResult;
use crate::keys;

/// Per-type behaviour of a master collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterStrategy {
    pub party_type: PartyType,
    pub key: &'static str,
    pub id_prefix: &'static str,
    /// Used in uniqueness errors, e.g. "broker name".
    pub name_field: &'static str,
    pub default_commission: Option<f64>,
}

pub static MASTER_STRATEGIES: [MasterStrategy; 5] = [
    MasterStrategy {
        party_type: PartyType::Supplier,
        key: keys::SUPPLIERS,
        id_prefix: "supplier",
        name_field: "supplier name",
        default_commission: None,
    },
    MasterStrategy {
        party_type: PartyType::Customer,
        key: keys::CUSTOMERS,
        id_prefix: "customer",
        name_field: "customer name",
        default_commission: None,
    },
    MasterStrategy {
        party_type: PartyType::Broker,
        key: keys::BROKERS,
        id_prefix: "broker",
        name_field: "broker name",
        default_commission: Some(DEFAULT_COMMISSION_RATE),
    },
    MasterStrategy {
        party_type: PartyType::Agent,
        key: keys::AGENTS,
        id_prefix: "agent",
        name_field: "agent name",
        default_commission: Some(DEFAULT_COMMISSION_RATE),
    },
    MasterStrategy {
        party_type: PartyType::Transporter,
        key: keys::TRANSPORTERS,
        id_prefix: "transporter",
        name_field: "transporter name",
        default_commission: None,
    },
];

impl MasterStrategy {
    pub fn of(party_type: PartyType) -> &'static MasterStrategy {
        let index = match party_type {
            PartyType::Supplier => 0,
            PartyType::Customer => 1,
            PartyType::Broker => 2,
            PartyType::Agent => 3,
            PartyType::Transporter => 4,
        };
        &MASTER_STRATEGIES[index]
    }
}

/// Form input for a new master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMaster {
    pub name: String,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl NewMaster {
    pub fn named(name: impl Into<String>) -> Self {
        NewMaster {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Repository for one master type.
#[derive(Debug, Clone)]
pub struct MasterRepository {
    collection: Collection<Master>,
    strategy: &'static MasterStrategy,
}

impl MasterRepository {
    pub fn new(store: WriteCoalescingStore, party_type: PartyType) -> Self {
        let strategy = MasterStrategy::of(party_type);
        MasterRepository {
            collection: Collection::new(store, strategy.key),
            strategy,
        }
    }

    pub fn party_type(&self) -> PartyType {
        self.strategy.party_type
    }

    pub fn collection(&self) -> &Collection<Master> {
        &self.collection
    }

    pub async fn get_all(&self) -> Vec<Master> {
        self.collection.get_all().await
    }

    pub async fn get_active(&self) -> Vec<Master> {
        self.collection.get_active().await
    }

    pub async fn get(&self, id: &str) -> Option<Master> {
        self.collection.get(id).await
    }

    /// Active master whose id or name matches `reference`.
    pub async fn find(&self, reference: &str) -> Option<Master> {
        self.get_active()
            .await
            .into_iter()
            .find(|m| m.is_referenced_by(reference))
    }

    /// Adds a master after checking its name against the active ones.
    ///
    /// Deleted masters don't block reuse of their name.
    pub async fn add(&self, input: NewMaster) -> StoreResult<Master> {
        let name = validate_name(self.strategy.name_field, &input.name)?;
        let _guard = self.collection.store().write_guard().await;
        let active = self.get_active().await;
        ensure_unique_name(self.strategy.name_field, &name, active.iter().map(|m| m.name.as_str()))?;

        let commission_rate = match input.commission_rate.or(self.strategy.default_commission) {
            Some(rate) if self.strategy.default_commission.is_some() => {
                validate_commission_rate(rate)?;
                Some(rate)
            }
            _ => None,
        };

        let master = Master {
            id: generate_id(self.strategy.id_prefix),
            name,
            commission_rate,
            phone: input.phone.filter(|p| !p.trim().is_empty()),
            address: input.address.filter(|a| !a.trim().is_empty()),
            created_at: Some(Utc::now().to_rfc3339()),
            is_deleted: false,
        };

        let master = self.collection.add_locked(master).await?;
        info!(party_type = %self.strategy.party_type, id = %master.id, name = %master.name, "Master added");
        Ok(master)
    }

    /// Applies a partial update. A rename is checked for uniqueness against
    /// the other active masters.
    pub async fn update(&self, id: &str, mut patch: Value) -> StoreResult<Master> {
        let _guard = self.collection.store().write_guard().await;
        if let Some(name) = patch.get("name").and_then(Value::as_str) {
            let name = validate_name(self.strategy.name_field, name)?;
            let others = self.get_active().await;
            ensure_unique_name(
                self.strategy.name_field,
                &name,
                others.iter().filter(|m| m.id() != id).map(|m| m.name.as_str()),
            )?;
            patch["name"] = Value::String(name);
        }
        if let Some(rate) = patch.get("commissionRate").and_then(Value::as_f64) {
            validate_commission_rate(rate)?;
        }
        self.collection.update_locked(id, patch).await
    }

    pub async fn soft_delete(&self, id: &str) -> StoreResult<()> {
        self.collection.soft_delete(id).await?;
        info!(party_type = %self.strategy.party_type, id, "Master deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::repository::test_support::store;
    use mandi_core::{CoreError, ValidationError};
    use serde_json::json;

    #[test]
    fn test_strategy_table_matches_party_types() {
        for party_type in PartyType::ALL {
            let strategy = MasterStrategy::of(party_type);
            assert_eq!(strategy.party_type, party_type);
            assert_eq!(strategy.key, keys::master_key(party_type));
        }
    }

    #[tokio::test]
    async fn test_add_assigns_prefixed_id_and_commission() {
        let brokers = MasterRepository::new(store().await, PartyType::Broker);
        let broker = brokers.add(NewMaster::named("Mohan")).await.unwrap();
        assert!(broker.id.starts_with("broker-"));
        assert_eq!(broker.commission_rate, Some(1.0));

        let suppliers = MasterRepository::new(store().await, PartyType::Supplier);
        let supplier = suppliers
            .add(NewMaster {
                name: "Shree Traders".to_string(),
                commission_rate: Some(5.0),
                ..NewMaster::default()
            })
            .await
            .unwrap();
        assert_eq!(supplier.commission_rate, None);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_case_insensitively() {
        let suppliers = MasterRepository::new(store().await, PartyType::Supplier);
        suppliers.add(NewMaster::named("Shree Traders")).await.unwrap();

        let err = suppliers.add(NewMaster::named("  shree TRADERS")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Core(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
        assert_eq!(suppliers.get_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_reused() {
        let customers = MasterRepository::new(store().await, PartyType::Customer);
        let first = customers.add(NewMaster::named("Ram & Sons")).await.unwrap();
        customers.soft_delete(&first.id).await.unwrap();

        let second = customers.add(NewMaster::named("Ram & Sons")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(customers.get_all().await.len(), 2);
        assert_eq!(customers.get_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_allowed_across_types() {
        let store = store().await;
        let suppliers = MasterRepository::new(store.clone(), PartyType::Supplier);
        let customers = MasterRepository::new(store, PartyType::Customer);
        suppliers.add(NewMaster::named("Gupta")).await.unwrap();
        assert!(customers.add(NewMaster::named("Gupta")).await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_checks_uniqueness() {
        let agents = MasterRepository::new(store().await, PartyType::Agent);
        let a = agents.add(NewMaster::named("Suresh")).await.unwrap();
        agents.add(NewMaster::named("Mahesh")).await.unwrap();

        assert!(agents.update(&a.id, json!({"name": "mahesh"})).await.is_err());
        let renamed = agents.update(&a.id, json!({"name": "SURESH", "phone": "98765"})).await.unwrap();
        assert_eq!(renamed.name, "SURESH");
        assert_eq!(renamed.phone.as_deref(), Some("98765"));
        assert_eq!(agents.find("suresh").await.map(|m| m.id), Some(a.id));
    }

    #[tokio::test]
    async fn test_concurrent_adds_keep_names_unique() {
        let suppliers = MasterRepository::new(store().await, PartyType::Supplier);
        let (first, second) = tokio::join!(
            suppliers.add(NewMaster::named("Shree")),
            suppliers.add(NewMaster::named("shree"))
        );

        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        assert_eq!(suppliers.get_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let transporters = MasterRepository::new(store().await, PartyType::Transporter);
        assert!(transporters.add(NewMaster::named("   ")).await.is_err());
    }
}
