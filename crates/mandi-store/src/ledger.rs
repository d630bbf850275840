//! # Inventory Ledger
//!
//! Persists the lot rules of [`mandi_core::inventory`].
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ledger.transfer(request)                                               │
//! │       │                                                                 │
//! │       ├── store write guard (shared with the repositories)              │
//! │       ├── read inventory rows from the store                            │
//! │       ├── mandi_core::inventory::transfer(&mut rows, request)           │
//! │       │       Err ──► return, nothing written                           │
//! │       ├── merge touched rows into the raw arrays                        │
//! │       └── IntentLog::commit({inventory, ...})                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation                    | Keys written             |
//! |------------------------------|--------------------------|
//! | `record_purchase`            | purchases, inventory     |
//! | `add_from_purchase`          | purchases, inventory     |
//! | `transfer`                   | inventory                |
//! | `decrement_for_sale`         | inventory                |
//! | `restore_for_sale_deletion`  | inventory                |
//! | `record_sale`                | sales, inventory         |
//! | `delete_sale`                | sales, inventory         |
//! | `edit_sale_quantity`         | sales, inventory         |
//! | `delete_inventory_item`      | inventory                |

use chrono::Utc;
use mandi_core::inventory::{self, RestoreOutcome};
use mandi_core::validation::{validate_date, validate_lot_number, validate_quantity};
use mandi_core::{
    generate_id, ConservationViolation, CoreError, DuplicateLotWarning, InventoryItem, LotSummary, Money,
    Purchase, Record, Sale, TransferOutcome, TransferRequest, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::coalesce::WriteCoalescingStore;
use crate::error::StoreResult;
use crate::intent::IntentLog;
use crate::keys;
use crate::repository::{Collection, InventoryRepository, PurchaseRepository, SaleRepository};

/// A purchase written by [`InventoryLedger::record_purchase`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPurchase {
    pub purchase: Purchase,
    pub inventory_item: InventoryItem,
    /// Other purchases share this lot number. The purchase is still recorded.
    pub warnings: Vec<DuplicateLotWarning>,
}

/// Full new values of the keys one ledger operation writes.
#[derive(Default)]
struct Writes(BTreeMap<String, Value>);

impl Writes {
    async fn merge<T: Record>(&mut self, collection: &Collection<T>, records: &[T]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let merged = collection.merged_with(records).await?;
        self.0.insert(collection.key().to_string(), Value::Array(merged));
        Ok(())
    }
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Rows whose ids are in `ids`, for writing back.
fn touched(rows: &[InventoryItem], ids: &[&str]) -> Vec<InventoryItem> {
    rows.iter().filter(|r| ids.contains(&r.id.as_str())).cloned().collect()
}

#[derive(Debug, Clone)]
pub struct InventoryLedger {
    purchases: PurchaseRepository,
    sales: SaleRepository,
    inventory: InventoryRepository,
    intents: IntentLog,
    store: WriteCoalescingStore,
}

impl InventoryLedger {
    pub fn new(store: WriteCoalescingStore) -> Self {
        InventoryLedger {
            purchases: Collection::new(store.clone(), keys::PURCHASES),
            sales: Collection::new(store.clone(), keys::SALES),
            inventory: Collection::new(store.clone(), keys::INVENTORY),
            intents: IntentLog::new(store.clone()),
            store,
        }
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Records a purchase and materializes it into inventory in one unit.
    ///
    /// A lot number shared with another active purchase is reported in
    /// [`RecordedPurchase::warnings`], not rejected.
    pub async fn record_purchase(&self, purchase: Purchase) -> StoreResult<RecordedPurchase> {
        let mut purchase = purchase.with_computed_totals();
        purchase.lot_number = validate_lot_number(&purchase.lot_number)?;
        validate_date("date", &purchase.date)?;
        validate_quantity("quantity", purchase.quantity)?;
        if purchase.id.trim().is_empty() {
            purchase.id = generate_id("purchase");
        }
        purchase.is_deleted = false;
        purchase.is_inventorized = false;

        let _guard = self.store.write_guard().await;
        if self.purchases.get(&purchase.id).await.is_some() {
            return Err(ValidationError::Duplicate {
                field: "Purchase id".to_string(),
                value: purchase.id,
            }
            .into());
        }

        let item = inventory::materialize(&purchase, &today())?;
        purchase.is_inventorized = true;

        let mut writes = Writes::default();
        writes.merge(&self.purchases, std::slice::from_ref(&purchase)).await?;
        writes.merge(&self.inventory, std::slice::from_ref(&item)).await?;
        self.intents.commit("record_purchase", writes.0).await?;

        let warnings: Vec<DuplicateLotWarning> = inventory::duplicate_lots(&self.purchases.get_active().await)
            .into_iter()
            .filter(|w| w.lot_number == purchase.lot_number)
            .collect();
        if !warnings.is_empty() {
            warn!(lot = %purchase.lot_number, purchases = warnings[0].purchase_ids.len(), "Lot number shared by several purchases");
        }
        info!(id = %purchase.id, lot = %purchase.lot_number, location = %purchase.location, "Purchase recorded");

        Ok(RecordedPurchase {
            purchase,
            inventory_item: item,
            warnings,
        })
    }

    /// Materializes an existing purchase into an inventory row.
    ///
    /// Fails with `AlreadyInventorized` when the purchase is flagged or an
    /// active row already points at it.
    pub async fn add_from_purchase(&self, purchase_id: &str) -> StoreResult<InventoryItem> {
        let _guard = self.store.write_guard().await;

        let mut purchase = self
            .purchases
            .get(purchase_id)
            .await
            .ok_or_else(|| CoreError::not_found(Purchase::ENTITY, purchase_id))?;
        let rows = self.inventory.get_active().await;
        if purchase.is_inventorized || rows.iter().any(|r| r.purchase_id.as_deref() == Some(purchase_id)) {
            return Err(CoreError::AlreadyInventorized(purchase_id.to_string()).into());
        }

        let item = inventory::materialize(&purchase, &today())?;
        purchase.is_inventorized = true;

        let mut writes = Writes::default();
        writes.merge(&self.purchases, std::slice::from_ref(&purchase)).await?;
        writes.merge(&self.inventory, std::slice::from_ref(&item)).await?;
        self.intents.commit("add_from_purchase", writes.0).await?;

        info!(purchase_id, item_id = %item.id, "Purchase added to inventory");
        Ok(item)
    }

    // =========================================================================
    // Stock Movements
    // =========================================================================

    /// Moves bags of a lot between locations. On error no row changes.
    pub async fn transfer(&self, request: TransferRequest) -> StoreResult<TransferOutcome> {
        let mut request = request;
        if request.date.trim().is_empty() {
            request.date = today();
        }

        let _guard = self.store.write_guard().await;
        let mut rows = self.inventory.get_all().await;
        let outcome = inventory::transfer(&mut rows, &request)?;

        let mut writes = Writes::default();
        let changed = touched(&rows, &[outcome.source_id.as_str(), outcome.destination_id.as_str()]);
        writes.merge(&self.inventory, &changed).await?;
        self.intents.commit("transfer", writes.0).await?;

        info!(
            lot = %request.lot_number,
            from = %request.from,
            to = %request.to,
            quantity = request.quantity,
            created_destination = outcome.created_destination,
            "Stock transferred"
        );
        Ok(outcome)
    }

    /// Takes bags out of a lot's row at `location`. Returns the row id.
    pub async fn decrement_for_sale(&self, lot_number: &str, location: &str, quantity: f64) -> StoreResult<String> {
        let _guard = self.store.write_guard().await;
        let mut rows = self.inventory.get_all().await;
        let item_id = inventory::decrement_for_sale(&mut rows, lot_number, location, quantity)?;

        let mut writes = Writes::default();
        writes.merge(&self.inventory, &touched(&rows, &[item_id.as_str()])).await?;
        self.intents.commit("decrement_for_sale", writes.0).await?;
        Ok(item_id)
    }

    /// Returns bags to a lot's row at `location`, clamped to the row's
    /// quantity.
    pub async fn restore_for_sale_deletion(
        &self,
        lot_number: &str,
        location: &str,
        quantity: f64,
    ) -> StoreResult<RestoreOutcome> {
        let _guard = self.store.write_guard().await;
        let mut rows = self.inventory.get_all().await;
        let outcome = restore_rows(&mut rows, lot_number, location, quantity)?;

        let mut writes = Writes::default();
        writes.merge(&self.inventory, &touched(&rows, &[outcome.item_id.as_str()])).await?;
        self.intents.commit("restore_for_sale_deletion", writes.0).await?;
        Ok(outcome)
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Checks stock, decrements it and appends the sale in one unit.
    ///
    /// Both the bags and the sale's net weight must fit in the row.
    pub async fn record_sale(&self, sale: Sale) -> StoreResult<Sale> {
        let mut sale = sale;
        sale.lot_number = validate_lot_number(&sale.lot_number)?;
        validate_date("date", &sale.date)?;
        validate_quantity("quantity", sale.quantity)?;
        if sale.customer_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "customerId".to_string(),
            }
            .into());
        }
        let location = match sale.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => location.to_string(),
            _ => {
                return Err(ValidationError::Required {
                    field: "location".to_string(),
                }
                .into())
            }
        };
        sale.location = Some(location.clone());
        if sale.id.trim().is_empty() {
            sale.id = generate_id("sale");
        }
        if sale.total_amount == 0.0 {
            sale.total_amount = Money::from_rupees(sale.net_weight * sale.rate).rupees();
        }
        sale.is_deleted = false;

        let _guard = self.store.write_guard().await;
        if self.sales.get(&sale.id).await.is_some() {
            return Err(ValidationError::Duplicate {
                field: "Sale id".to_string(),
                value: sale.id,
            }
            .into());
        }

        let mut rows = self.inventory.get_all().await;
        let item_id = inventory::decrement_for_sale_by_weight(
            &mut rows,
            &sale.lot_number,
            &location,
            sale.quantity,
            sale.net_weight,
        )?;

        let mut writes = Writes::default();
        writes.merge(&self.sales, std::slice::from_ref(&sale)).await?;
        writes.merge(&self.inventory, &touched(&rows, &[item_id.as_str()])).await?;
        self.intents.commit("record_sale", writes.0).await?;

        info!(id = %sale.id, lot = %sale.lot_number, location = %location, quantity = sale.quantity, "Sale recorded");
        Ok(sale)
    }

    /// Soft-deletes a sale and returns its bags to stock.
    ///
    /// When the lot no longer has a row at the sale's location the sale is
    /// still deleted and the missing stock is logged.
    pub async fn delete_sale(&self, id: &str) -> StoreResult<Sale> {
        let _guard = self.store.write_guard().await;
        let mut sale = self.sales.require_active(id).await?;
        let mut rows = self.inventory.get_all().await;

        let mut changed = Vec::new();
        match sale_location(&sale, &rows) {
            Some(location) => match restore_rows(&mut rows, &sale.lot_number, &location, sale.quantity) {
                Ok(outcome) => changed = touched(&rows, &[outcome.item_id.as_str()]),
                Err(CoreError::LotNotFound { .. }) => {
                    warn!(id, lot = %sale.lot_number, location = %location, "No inventory row to restore deleted sale into");
                }
                Err(e) => return Err(e.into()),
            },
            None => warn!(id, lot = %sale.lot_number, "Deleted sale has no location; inventory not restored"),
        }

        sale.is_deleted = true;
        let mut writes = Writes::default();
        writes.merge(&self.sales, std::slice::from_ref(&sale)).await?;
        writes.merge(&self.inventory, &changed).await?;
        self.intents.commit("delete_sale", writes.0).await?;

        info!(id, lot = %sale.lot_number, quantity = sale.quantity, "Sale deleted");
        Ok(sale)
    }

    /// Changes a sale's bag count and moves the difference in or out of
    /// stock. Net weight and amount scale with the bags.
    pub async fn edit_sale_quantity(&self, id: &str, quantity: f64) -> StoreResult<Sale> {
        validate_quantity("quantity", quantity)?;

        let _guard = self.store.write_guard().await;
        let mut sale = self.sales.require_active(id).await?;
        let delta = quantity - sale.quantity;
        if delta.abs() < f64::EPSILON {
            return Ok(sale);
        }

        let location = sale_location(&sale, &[]).ok_or_else(|| ValidationError::Required {
            field: "location".to_string(),
        })?;
        let factor = if sale.quantity > 0.0 { quantity / sale.quantity } else { 1.0 };
        let net_weight = sale.net_weight * factor;

        let mut rows = self.inventory.get_all().await;
        let item_id = if delta > 0.0 {
            let extra_weight = net_weight - sale.net_weight;
            inventory::decrement_for_sale_by_weight(&mut rows, &sale.lot_number, &location, delta, extra_weight)?
        } else {
            restore_rows(&mut rows, &sale.lot_number, &location, -delta)?.item_id
        };

        sale.net_weight = net_weight;
        sale.total_amount = Money::from_rupees(sale.total_amount * factor).rupees();
        sale.quantity = quantity;
        sale.location = Some(location);

        let mut writes = Writes::default();
        writes.merge(&self.sales, std::slice::from_ref(&sale)).await?;
        writes.merge(&self.inventory, &touched(&rows, &[item_id.as_str()])).await?;
        self.intents.commit("edit_sale_quantity", writes.0).await?;

        info!(id, quantity, delta, "Sale quantity edited");
        Ok(sale)
    }

    // =========================================================================
    // Inventory Rows
    // =========================================================================

    /// Soft-deletes an inventory row. The caller must pass `confirmed` once
    /// the user has agreed.
    pub async fn delete_inventory_item(&self, id: &str, confirmed: bool) -> StoreResult<InventoryItem> {
        if !confirmed {
            return Err(CoreError::ConfirmationRequired(id.to_string()).into());
        }
        let _guard = self.store.write_guard().await;
        let mut item = self.inventory.require_active(id).await?;
        item.is_deleted = true;

        let mut writes = Writes::default();
        writes.merge(&self.inventory, std::slice::from_ref(&item)).await?;
        self.intents.commit("delete_inventory_item", writes.0).await?;

        warn!(id, lot = %item.lot_number, remaining = item.remaining_quantity, "Inventory row deleted");
        Ok(item)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub async fn lot_summary(&self, lot_number: &str) -> LotSummary {
        inventory::lot_summary(&self.inventory.get_active().await, lot_number)
    }

    pub async fn available_at(&self, lot_number: &str, location: &str) -> f64 {
        inventory::available_at(&self.inventory.get_active().await, lot_number, location)
    }

    /// Stock invariant violations over all active rows. Empty when healthy.
    pub async fn verify_conservation(&self) -> Vec<ConservationViolation> {
        let violations = inventory::verify_conservation(&self.inventory.get_active().await);
        if !violations.is_empty() {
            warn!(count = violations.len(), "Inventory conservation violations found");
        }
        violations
    }

    pub async fn duplicate_lots(&self) -> Vec<DuplicateLotWarning> {
        inventory::duplicate_lots(&self.purchases.get_active().await)
    }
}

/// Restores bags and logs when the row could not take them all.
fn restore_rows(
    rows: &mut [InventoryItem],
    lot_number: &str,
    location: &str,
    quantity: f64,
) -> Result<RestoreOutcome, CoreError> {
    let outcome = inventory::restore_for_sale_deletion(rows, lot_number, location, quantity)?;
    if outcome.was_clamped() {
        warn!(lot = lot_number, location, overflow = outcome.overflow, "Restored bags exceed row quantity; clamped");
    }
    Ok(outcome)
}

/// Location a sale drew from. Older sales carry none; for those the lot's
/// row with sold bags is used.
fn sale_location(sale: &Sale, rows: &[InventoryItem]) -> Option<String> {
    if let Some(location) = sale.location.as_deref().filter(|l| !l.trim().is_empty()) {
        return Some(location.trim().to_string());
    }
    rows.iter()
        .find(|r| r.is_active() && r.lot_number == sale.lot_number && r.quantity > r.remaining_quantity)
        .map(|r| r.location.clone())
}
