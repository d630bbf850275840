//! # mandi-core: Pure Business Logic for Mandi Ledger
//!
//! This crate holds the ledger's rules as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Mandi Ledger Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI (forms, dashboards)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        mandi-store (KV storage, cache, repositories)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ LedgerSnapshot / Vec<InventoryItem>    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mandi-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ inventory │  │  balance  │  │  profit   │  │   │
//! │  │   │  Purchase │  │  transfer │  │  Party-   │  │  Profit-  │  │   │
//! │  │   │   Sale    │  │  restore  │  │  Balance  │  │  Report   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO STORAGE • NO TIMERS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (Purchase, Sale, InventoryItem, Master, ...)
//! - [`money`] - Paise accumulator for balance and profit sums
//! - [`period`] - Date parsing, months, financial years
//! - [`inventory`] - Lot stock rules (materialize, transfer, sale decrement)
//! - [`balance`] - Party balances
//! - [`profit`] - Per-sale and per-month profit
//! - [`validation`] - Input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use mandi_core::{calculate_party_balances, LedgerSnapshot, PartyType};
//!
//! let snapshot: LedgerSnapshot = serde_json::from_value(serde_json::json!({
//!     "purchases": [{"id": "p1", "party": "supplier-1", "totalAfterExpenses": 52000}],
//!     "sales": [], "payments": [
//!         {"id": "pay1", "partyId": "supplier-1", "partyType": "supplier", "amount": 20000}
//!     ],
//!     "receipts": [], "inventory": [],
//!     "suppliers": [{"id": "supplier-1", "name": "Shree Traders"}],
//!     "customers": [], "brokers": [], "agents": [], "transporters": []
//! })).unwrap();
//!
//! let balances = calculate_party_balances(&snapshot, PartyType::Supplier);
//! assert_eq!(balances[0].balance, 32000.0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod balance;
pub mod error;
pub mod inventory;
pub mod money;
pub mod period;
pub mod profit;
pub mod snapshot;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use balance::{calculate_party_balance, calculate_party_balances};
pub use error::{CoreError, CoreResult, ValidationError};
pub use inventory::{ConservationViolation, LotSummary, TransferOutcome, TransferRequest};
pub use money::Money;
pub use profit::{calculate_profit, ProfitScope};
pub use snapshot::LedgerSnapshot;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Commission percentage assumed for brokers and agents without one.
pub const DEFAULT_COMMISSION_RATE: f64 = 1.0;

/// Longest accepted master or location name.
pub const MAX_NAME_LENGTH: usize = 120;
