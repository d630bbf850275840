//! Read-only view of the ledger handed to the balance and profit engines.

use serde::{Deserialize, Serialize};

use crate::types::{InventoryItem, Master, PartyType, Payment, Purchase, Receipt, Sale};

/// Every collection the derived computations need, decoded once.
///
/// Collections hold all records, soft-deleted ones included; the engines
/// filter. Building a snapshot is the store's job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub purchases: Vec<Purchase>,
    pub sales: Vec<Sale>,
    pub payments: Vec<Payment>,
    pub receipts: Vec<Receipt>,
    pub inventory: Vec<InventoryItem>,
    pub suppliers: Vec<Master>,
    pub customers: Vec<Master>,
    pub brokers: Vec<Master>,
    pub agents: Vec<Master>,
    pub transporters: Vec<Master>,
}

impl LedgerSnapshot {
    /// Master records of one party type.
    pub fn masters(&self, party_type: PartyType) -> &[Master] {
        match party_type {
            PartyType::Supplier => &self.suppliers,
            PartyType::Customer => &self.customers,
            PartyType::Broker => &self.brokers,
            PartyType::Agent => &self.agents,
            PartyType::Transporter => &self.transporters,
        }
    }

    pub fn masters_mut(&mut self, party_type: PartyType) -> &mut Vec<Master> {
        match party_type {
            PartyType::Supplier => &mut self.suppliers,
            PartyType::Customer => &mut self.customers,
            PartyType::Broker => &mut self.brokers,
            PartyType::Agent => &mut self.agents,
            PartyType::Transporter => &mut self.transporters,
        }
    }
}
