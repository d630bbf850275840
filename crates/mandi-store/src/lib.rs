//! # mandi-store: Storage Layer for Mandi Ledger
//!
//! This crate owns the ledger's local key-value namespace. It uses SQLite
//! through sqlx for durable storage and layers caching, write coalescing and
//! cross-instance change notifications on top.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mandi Ledger Data Flow                           │
//! │                                                                         │
//! │  UI action (record sale, transfer stock, view balances)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  mandi-store (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │  StorageEngine                                                  │   │
//! │  │   ├── repository   typed collections, soft delete               │   │
//! │  │   ├── ledger       inventory operations (intent-logged)         │   │
//! │  │   └── backup       export/import, emergency slots               │   │
//! │  │        │                                                        │   │
//! │  │        ▼                                                        │   │
//! │  │  WriteCoalescingStore (100ms) ─► CacheLayer (30s) ─► kv         │   │
//! │  │                                                     │           │   │
//! │  │                                 ChangeBus ◄─────────┘           │   │
//! │  │                     (sibling engines, UI observers)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite: kv_store(key, value JSON, updated_at)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`kv`] - Key-value primitive over SQLite
//! - [`notify`] - Change bus shared by every engine on a database
//! - [`cache`] - TTL read cache
//! - [`coalesce`] - Buffered writes with delayed flush
//! - [`repository`] - Typed collections, masters, locations, financial years
//! - [`ledger`] - Inventory operations
//! - [`intent`] - Write-ahead intent log for multi-key operations
//! - [`backup`] - Export/import and emergency backups
//! - [`engine`] - Engine lifecycle
//! - [`config`] - TOML configuration with env overrides
//! - [`telemetry`] - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mandi_store::{LedgerConfig, StorageEngine};
//! use mandi_core::PartyType;
//!
//! let engine = StorageEngine::open(LedgerConfig::load_or_default(None)).await?;
//!
//! engine.locations().add("Godown A").await?;
//! let recorded = engine.ledger().record_purchase(purchase).await?;
//! let balances = engine.party_balances(PartyType::Supplier).await;
//!
//! engine.dispose().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backup;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod engine;
pub mod error;
pub mod intent;
pub mod keys;
pub mod kv;
pub mod ledger;
pub mod notify;
pub mod repository;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use backup::{BackupDocument, BackupService};
pub use cache::CacheLayer;
pub use coalesce::WriteCoalescingStore;
pub use config::LedgerConfig;
pub use engine::StorageEngine;
pub use error::{StoreError, StoreResult};
pub use intent::{IntentLog, LedgerIntent};
pub use kv::{open_pool, KeyValueStorage};
pub use ledger::{InventoryLedger, RecordedPurchase};
pub use notify::{ChangeBus, StorageChange, SubscriptionId};

// Repository re-exports for convenience
pub use repository::{
    Collection, FinancialYearRepository, InventoryRepository, LocationRepository, MasterRepository,
    NewMaster, PaymentRepository, PurchaseRepository, SaleRepository,
};
