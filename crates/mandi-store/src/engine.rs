//! # Storage Engine
//!
//! One application instance over the ledger namespace.
//!
//! ## Composition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         StorageEngine                                   │
//! │                                                                         │
//! │   repositories ─┐                                                       │
//! │   ledger ───────┼──► WriteCoalescingStore ──► CacheLayer                │
//! │   backup ───────┘            │                    │                     │
//! │                              └──────► KeyValueStorage ◄─┘               │
//! │                                        │      │                         │
//! │                                 SqlitePool  ChangeBus                   │
//! │                                   (shared with siblings)                │
//! │                                                                         │
//! │   background: emergency backup every `backup_interval_secs`             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! ```text
//! open(config) ──► pool + bus ──► preload hot keys ──► replay ledger intent
//!              ──► start backup task
//! dispose()    ──► stop backup task ──► flush ──► emergency backup
//!              ──► store stops accepting writes
//! ```
//!
//! Engines are built once and shared as `Arc<StorageEngine>`.
//! [`sibling`](StorageEngine::sibling) opens a second instance on the same
//! database and bus, the way a second window of the app would.

use mandi_core::{
    calculate_party_balance, calculate_party_balances, calculate_profit, DuplicateLotWarning, LedgerSnapshot,
    PartyBalance, PartyType, ProfitReport, ProfitScope,
};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::BackupService;
use crate::cache::CacheLayer;
use crate::coalesce::WriteCoalescingStore;
use crate::config::LedgerConfig;
use crate::error::StoreResult;
use crate::intent::IntentLog;
use crate::keys;
use crate::kv::{open_pool, KeyValueStorage};
use crate::ledger::InventoryLedger;
use crate::notify::{ChangeBus, StorageChange};
use crate::repository::{
    Collection, FinancialYearRepository, InventoryRepository, LocationRepository, MasterRepository,
    PaymentRepository, PurchaseRepository, SaleRepository,
};

/// Handle of the periodic emergency backup task.
struct BackupTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackupTask {
    fn spawn(backup: BackupService, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            debug!(period_secs = period.as_secs(), "Emergency backup task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = backup.emergency_backup().await {
                            error!(error = %e, "Periodic emergency backup failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Emergency backup task shutting down");
                        break;
                    }
                }
            }
        });
        BackupTask { shutdown_tx, handle }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Emergency backup task ended abnormally");
        }
    }
}

pub struct StorageEngine {
    config: LedgerConfig,
    store: WriteCoalescingStore,
    ledger: InventoryLedger,
    backup: BackupService,
    backup_task: Mutex<Option<BackupTask>>,
}

impl StorageEngine {
    /// Opens the database described by `config` and starts an engine on it.
    pub async fn open(config: LedgerConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let pool = open_pool(&config).await?;
        Self::attach(config, pool, ChangeBus::new()).await
    }

    /// A second instance sharing this engine's database and change bus.
    pub async fn sibling(&self) -> StoreResult<Arc<Self>> {
        let storage = self.store.storage();
        Self::attach(self.config.clone(), storage.pool().clone(), Arc::clone(storage.bus())).await
    }

    async fn attach(config: LedgerConfig, pool: SqlitePool, bus: Arc<ChangeBus>) -> StoreResult<Arc<Self>> {
        let origin = format!("engine-{}", Uuid::new_v4());
        let storage = KeyValueStorage::new(pool, bus, origin.clone());
        let cache = CacheLayer::new(storage, config.cache_ttl_duration());
        let store = WriteCoalescingStore::open(cache, config.flush_delay_duration()).await;

        for intent in IntentLog::new(store.clone()).recover().await? {
            info!(kind = %intent.kind, "Recovered interrupted ledger operation");
        }

        let backup = BackupService::new(store.clone());
        let backup_task = config
            .backup_interval_duration()
            .map(|period| BackupTask::spawn(backup.clone(), period));

        info!(origin = %origin, backups = backup_task.is_some(), "Storage engine opened");
        Ok(Arc::new(StorageEngine {
            ledger: InventoryLedger::new(store.clone()),
            backup,
            backup_task: Mutex::new(backup_task),
            store,
            config,
        }))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn origin(&self) -> &str {
        self.store.storage().origin()
    }

    pub fn store(&self) -> &WriteCoalescingStore {
        &self.store
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    pub fn purchases(&self) -> PurchaseRepository {
        Collection::new(self.store.clone(), keys::PURCHASES)
    }

    pub fn sales(&self) -> SaleRepository {
        Collection::new(self.store.clone(), keys::SALES)
    }

    pub fn payments(&self) -> PaymentRepository {
        Collection::new(self.store.clone(), keys::PAYMENTS)
    }

    pub fn receipts(&self) -> PaymentRepository {
        Collection::new(self.store.clone(), keys::RECEIPTS)
    }

    pub fn inventory(&self) -> InventoryRepository {
        Collection::new(self.store.clone(), keys::INVENTORY)
    }

    pub fn masters(&self, party_type: PartyType) -> MasterRepository {
        MasterRepository::new(self.store.clone(), party_type)
    }

    pub fn locations(&self) -> LocationRepository {
        LocationRepository::new(self.store.clone())
    }

    pub fn financial_years(&self) -> FinancialYearRepository {
        FinancialYearRepository::new(self.store.clone())
    }

    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    pub fn backup(&self) -> &BackupService {
        &self.backup
    }

    // =========================================================================
    // Derived Data
    // =========================================================================

    /// Decodes every collection the balance and profit engines read.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot {
            purchases: self.purchases().get_all().await,
            sales: self.sales().get_all().await,
            payments: self.payments().get_all().await,
            receipts: self.receipts().get_all().await,
            inventory: self.inventory().get_all().await,
            ..LedgerSnapshot::default()
        };
        for party_type in PartyType::ALL {
            *snapshot.masters_mut(party_type) = self.masters(party_type).get_all().await;
        }
        snapshot
    }

    pub async fn party_balances(&self, party_type: PartyType) -> Vec<PartyBalance> {
        calculate_party_balances(&self.snapshot().await, party_type)
    }

    pub async fn party_balance(&self, party_type: PartyType, id: &str) -> Option<PartyBalance> {
        calculate_party_balance(&self.snapshot().await, party_type, id)
    }

    pub async fn profit(&self, scope: ProfitScope) -> ProfitReport {
        calculate_profit(&self.snapshot().await, scope)
    }

    pub async fn duplicate_lot_warnings(&self) -> Vec<DuplicateLotWarning> {
        self.ledger.duplicate_lots().await
    }

    // =========================================================================
    // Change Notifications
    // =========================================================================

    /// Stream of every change on the shared bus, from any instance.
    pub fn watch(&self) -> broadcast::Receiver<StorageChange> {
        self.store.storage().bus().watch()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Writes every buffered change now.
    pub async fn flush(&self) -> StoreResult<usize> {
        self.store.flush_changes().await
    }

    /// Takes an emergency backup after an unrecoverable error elsewhere in
    /// the app. Never fails; problems are logged.
    pub async fn on_fatal_error(&self, context: &str) {
        error!(context, origin = %self.origin(), "Fatal error reported; taking emergency backup");
        if let Err(e) = self.backup.emergency_backup().await {
            error!(error = %e, "Emergency backup after fatal error failed");
        }
    }

    /// Stops the backup task, flushes, takes a final emergency backup and
    /// stops accepting writes. Calling it again is a no-op.
    pub async fn dispose(&self) -> StoreResult<()> {
        if self.store.is_disposed() {
            return Ok(());
        }

        let task = self
            .backup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.stop().await;
        }

        if let Err(e) = self.backup.emergency_backup().await {
            error!(error = %e, "Final emergency backup failed");
        }
        self.store.dispose().await?;
        info!(origin = %self.origin(), "Storage engine disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        let task = self
            .backup_task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.handle.abort();
        }
        if self.store.has_pending() {
            warn!(pending = ?self.store.pending_keys(), "Storage engine dropped with unflushed writes");
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("origin", &self.origin())
            .field("database", &self.config.database_path)
            .finish()
    }
}
