//! # Domain Types
//!
//! Core domain types used throughout Mandi Ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Purchase     │──►│  InventoryItem  │──►│      Sale       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  lotNumber      │   │  lotNumber      │   │  lotNumber      │       │
//! │  │  party          │   │  location       │   │  customerId     │       │
//! │  │  netWeight      │   │  quantity       │   │  netWeight      │       │
//! │  │  totalAfterExp. │   │  remainingQty   │   │  totalAmount    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Master      │   │ Payment/Receipt │   │  PartyBalance   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  (derived)      │       │
//! │  │  id (prefixed)  │   │  partyId        │   │  ProfitRecord   │       │
//! │  │  name           │   │  partyType      │   │  (derived)      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persisted Shape
//! Every entity is stored as an element of a JSON array under its collection
//! key, with camelCase field names shared with the TypeScript UI. Numeric
//! fields are decoded leniently: form inputs sometimes persist `"1000"` instead
//! of `1000`, and an empty input persists `""`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Record Trait
// =============================================================================

/// Common surface of every persisted entity.
///
/// Repositories are generic over this trait: it is all they need to filter
/// soft-deleted rows and locate a record by id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity name used in errors and logs.
    const ENTITY: &'static str;

    fn id(&self) -> &str;

    fn is_deleted(&self) -> bool;

    #[inline]
    fn is_active(&self) -> bool {
        !self.is_deleted()
    }
}

/// Generates a new type-prefixed id, e.g. `broker-5f0c…`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;

            fn id(&self) -> &str {
                &self.id
            }

            fn is_deleted(&self) -> bool {
                self.is_deleted
            }
        }
    };
}

// =============================================================================
// Party Type
// =============================================================================

/// The closed set of counterparty kinds.
///
/// Written lowercase. Reads go through [`FromStr`], so older records holding
/// `"Supplier"` or `"suppliers"` still decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum PartyType {
    Supplier,
    Customer,
    Broker,
    Agent,
    Transporter,
}

impl PartyType {
    pub const ALL: [PartyType; 5] = [
        PartyType::Supplier,
        PartyType::Customer,
        PartyType::Broker,
        PartyType::Agent,
        PartyType::Transporter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartyType::Supplier => "supplier",
            PartyType::Customer => "customer",
            PartyType::Broker => "broker",
            PartyType::Agent => "agent",
            PartyType::Transporter => "transporter",
        }
    }
}

impl fmt::Display for PartyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "supplier" | "suppliers" => Ok(PartyType::Supplier),
            "customer" | "customers" => Ok(PartyType::Customer),
            "broker" | "brokers" => Ok(PartyType::Broker),
            "agent" | "agents" => Ok(PartyType::Agent),
            "transporter" | "transporters" => Ok(PartyType::Transporter),
            other => Err(ValidationError::InvalidFormat {
                field: "partyType".to_string(),
                reason: format!("unknown party type '{}'", other),
            }),
        }
    }
}

impl TryFrom<String> for PartyType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// =============================================================================
// Master
// =============================================================================

/// A counterparty master record (supplier, customer, broker, agent, transporter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Master {
    /// Type-prefixed unique id, e.g. `broker-5f0c…`.
    pub id: String,

    /// Display name, unique case-insensitively among active masters of a type.
    #[serde(default)]
    pub name: String,

    /// Commission percentage (brokers and agents only).
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub commission_rate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default)]
    pub is_deleted: bool,
}

impl_record!(Master, "Master");

impl Master {
    /// Case-insensitive name comparison used for uniqueness checks.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }

    /// True when a transaction's party reference points at this master.
    ///
    /// Older records reference parties by name, newer ones by id.
    pub fn is_referenced_by(&self, reference: &str) -> bool {
        let reference = reference.trim();
        !reference.is_empty() && (self.id == reference || self.has_name(reference))
    }
}

// =============================================================================
// Purchase
// =============================================================================

/// How purchase brokerage is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum BrokerageType {
    /// `brokerageRate` is a percentage of `totalAmount`.
    #[default]
    Percentage,
    /// `brokerageRate` is a fixed rupee amount.
    Fixed,
}

/// A purchase intake event for one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: String,
    #[serde(default)]
    pub date: String,
    /// Lot identifier. Duplicates across purchases are allowed and flagged.
    #[serde(default)]
    pub lot_number: String,
    /// Supplier id or (older records) supplier name.
    #[serde(default)]
    pub party: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transporter_id: Option<String>,
    /// Bags.
    #[serde(default, deserialize_with = "lenient::number")]
    pub quantity: f64,
    /// Kilograms.
    #[serde(default, deserialize_with = "lenient::number")]
    pub net_weight: f64,
    /// ₹ per kg.
    #[serde(default, deserialize_with = "lenient::number")]
    pub rate: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub expenses: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub total_after_expenses: f64,
    #[serde(default)]
    pub brokerage_type: BrokerageType,
    #[serde(default, deserialize_with = "lenient::number")]
    pub brokerage_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub brokerage_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub transport_cost: Option<f64>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_deleted: bool,
    /// Set once the purchase has been materialized into an inventory row.
    #[serde(default)]
    pub is_inventorized: bool,
}

impl_record!(Purchase, "Purchase");

impl Purchase {
    /// Brokerage owed on this purchase.
    pub fn brokerage(&self) -> Money {
        match self.brokerage_type {
            BrokerageType::Percentage => {
                Money::from_rupees(self.total_amount).percent(self.brokerage_rate)
            }
            BrokerageType::Fixed => Money::from_rupees(self.brokerage_rate),
        }
    }

    /// Recomputes derived totals so that
    /// `totalAfterExpenses = totalAmount + expenses + brokerage`.
    ///
    /// `totalAmount` is filled from `netWeight × rate` when the form left it empty.
    pub fn with_computed_totals(mut self) -> Self {
        if self.total_amount == 0.0 {
            self.total_amount = Money::from_rupees(self.net_weight * self.rate).rupees();
        }
        let brokerage = self.brokerage();
        self.brokerage_amount = if brokerage.is_zero() {
            None
        } else {
            Some(brokerage.rupees())
        };
        self.total_after_expenses = (Money::from_rupees(self.total_amount)
            + Money::from_rupees(self.expenses)
            + brokerage)
            .rupees();
        self
    }

    /// Landed cost per kilogram, zero when the weight is unknown.
    pub fn cost_per_kg(&self) -> f64 {
        if self.net_weight > 0.0 {
            self.total_after_expenses / self.net_weight
        } else {
            0.0
        }
    }
}

// =============================================================================
// Inventory
// =============================================================================

/// Stock of one lot at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    /// Back-reference to the purchase this row was materialized from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    #[serde(default)]
    pub lot_number: String,
    #[serde(default)]
    pub location: String,
    /// Bags held by this row (moves with transfers).
    #[serde(default, deserialize_with = "lenient::number")]
    pub quantity: f64,
    /// Bags not yet sold or transferred out.
    #[serde(default, deserialize_with = "lenient::number")]
    pub remaining_quantity: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub net_weight: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub rate: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub purchase_rate: f64,
    /// Landed cost per kg (purchase total after expenses / net weight).
    #[serde(default, deserialize_with = "lenient::number")]
    pub final_cost: f64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_sold_out: bool,
    #[serde(default)]
    pub date_added: String,
}

impl_record!(InventoryItem, "InventoryItem");

impl InventoryItem {
    /// Average kilograms per bag, zero for an empty row.
    pub fn weight_per_bag(&self) -> f64 {
        if self.quantity > 0.0 {
            self.net_weight / self.quantity
        } else {
            0.0
        }
    }

    /// Kilograms still in stock, at the row's average weight per bag.
    pub fn remaining_weight(&self) -> f64 {
        self.weight_per_bag() * self.remaining_quantity
    }

    /// True when the row is the given lot at the given location (case-insensitive location).
    pub fn is_lot_at(&self, lot_number: &str, location: &str) -> bool {
        self.lot_number == lot_number && self.location.eq_ignore_ascii_case(location)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale of bags from a lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub lot_number: String,
    /// Customer id or (older records) customer name.
    #[serde(default)]
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transporter_id: Option<String>,
    /// Inventory location the bags were drawn from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub net_weight: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub rate: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub total_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub brokerage_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub transport_cost: Option<f64>,
    /// Officially billed amount when it differs from `totalAmount` (cut bill).
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_number")]
    pub bill_amount: Option<f64>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl_record!(Sale, "Sale");

impl Sale {
    /// True when the billed amount differs from the actual amount.
    pub fn is_cut_bill(&self) -> bool {
        self.bill_amount
            .map(|billed| Money::from_rupees(billed) != Money::from_rupees(self.total_amount))
            .unwrap_or(false)
    }
}

// =============================================================================
// Payments & Receipts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    #[default]
    Cash,
    Cheque,
    Online,
    Upi,
}

/// Money moving between the business and a party.
///
/// Stored under `payments` (business pays) or `receipts` (business receives).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub party_id: String,
    pub party_type: PartyType,
    #[serde(default, deserialize_with = "lenient::number")]
    pub amount: f64,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl_record!(Payment, "Payment");

/// Receipts share the payment shape; only the collection differs.
pub type Receipt = Payment;

// =============================================================================
// Financial Year
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FinancialYear {
    pub id: String,
    /// e.g. `"2024-25"`.
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub is_active: bool,
}

// =============================================================================
// Derived Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum BalanceType {
    Debit,
    Credit,
}

/// Running balance of one party. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PartyBalance {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub party_type: PartyType,
    /// Signed: positive means the balance is a debit.
    pub balance: f64,
    pub balance_type: BalanceType,
}

/// Profit of a single sale. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProfitRecord {
    pub sale_id: String,
    pub date: String,
    /// `MMMM yyyy`, absent when the sale date is missing or malformed.
    pub month: Option<String>,
    pub lot_number: String,
    pub customer_id: String,
    pub net_weight: f64,
    pub revenue: f64,
    pub allocated_cost: f64,
    pub profit: f64,
    /// Purchase the cost was allocated from, if any shared the lot.
    pub purchase_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyProfit {
    pub month: String,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProfitReport {
    pub by_transaction: Vec<ProfitRecord>,
    /// Most recent month first.
    pub by_month: Vec<MonthlyProfit>,
    pub total: f64,
}

/// A lot number shared by more than one purchase.
///
/// Surfaced to the caller; the ledger never merges such lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateLotWarning {
    pub lot_number: String,
    pub purchase_ids: Vec<String>,
}

// =============================================================================
// Lenient Decoding
// =============================================================================

pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn to_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite())
    }

    /// Numbers or numeric strings; anything else decodes as 0.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(to_f64(&value).unwrap_or(0.0))
    }

    /// Like [`number`], but null, empty or unparsable input is `None`.
    pub fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(to_f64(&value))
    }
}
