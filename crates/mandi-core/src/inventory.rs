//! # Inventory Rules
//!
//! Pure lot-level stock rules. The store loads the `inventory` collection,
//! applies one of these functions to the decoded rows, and persists the rows
//! it reports as touched.
//!
//! ## Lot Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Purchase ──materialize──► Row @ Godown A  (qty 100, remaining 100)    │
//! │                                   │                                     │
//! │                      transfer 30  │                                     │
//! │                                   ▼                                     │
//! │                 Row @ Godown A (70/70) ──► Row @ Shop (30/30)            │
//! │                                                  │                      │
//! │                                  sale of 10 bags │ decrement_for_sale   │
//! │                                                  ▼                      │
//! │                                          Row @ Shop (30/20)             │
//! │                                                                         │
//! │   Σ quantity over the lot stays 100 through every transfer.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomicity
//! Every function validates before it mutates. On `Err` the slice is exactly
//! as it was passed in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{generate_id, DuplicateLotWarning, InventoryItem, Purchase, Record};
use crate::validation::validate_quantity;

/// Id prefix of inventory rows.
pub const INVENTORY_ID_PREFIX: &str = "inv";

/// Quantities closer than this are treated as equal (bags can be fractional).
const EPSILON: f64 = 1e-9;

/// Kilograms of slack allowed when comparing a sale's weight to stock.
const WEIGHT_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Materialization
// =============================================================================

/// Builds the inventory row for a purchase.
///
/// Fails when the purchase is soft-deleted or was already materialized. The
/// caller is responsible for flagging the purchase `isInventorized`.
pub fn materialize(purchase: &Purchase, date_added: &str) -> CoreResult<InventoryItem> {
    if purchase.is_deleted {
        return Err(CoreError::not_found(Purchase::ENTITY, &purchase.id));
    }
    if purchase.is_inventorized {
        return Err(CoreError::AlreadyInventorized(purchase.id.clone()));
    }
    if purchase.location.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "location".to_string(),
        }
        .into());
    }

    Ok(InventoryItem {
        id: generate_id(INVENTORY_ID_PREFIX),
        purchase_id: Some(purchase.id.clone()),
        lot_number: purchase.lot_number.trim().to_string(),
        location: purchase.location.trim().to_string(),
        quantity: purchase.quantity,
        remaining_quantity: purchase.quantity,
        net_weight: purchase.net_weight,
        rate: purchase.rate,
        purchase_rate: purchase.rate,
        final_cost: purchase.cost_per_kg(),
        is_deleted: false,
        is_sold_out: purchase.quantity <= 0.0,
        date_added: date_added.to_string(),
    })
}

// =============================================================================
// Transfers
// =============================================================================

/// A request to move bags of a lot between locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub lot_number: String,
    pub from: String,
    pub to: String,
    pub quantity: f64,
    pub date: String,
}

/// Rows touched by a successful transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub source_id: String,
    pub destination_id: String,
    /// True when no destination row existed and one was created.
    pub created_destination: bool,
}

/// Moves `quantity` bags of a lot from one location to another.
///
/// The source row loses the bags from both `quantity` and
/// `remainingQuantity`; the destination row (existing or new) gains them in
/// both. Net weight moves in proportion to the bags moved, so the lot's total
/// quantity and weight are unchanged.
pub fn transfer(items: &mut Vec<InventoryItem>, request: &TransferRequest) -> CoreResult<TransferOutcome> {
    let lot = request.lot_number.trim();
    let from = request.from.trim();
    let to = request.to.trim();

    if from.eq_ignore_ascii_case(to) {
        return Err(CoreError::SameLocation {
            lot_number: lot.to_string(),
            location: from.to_string(),
        });
    }
    validate_quantity("quantity", request.quantity)?;
    if to.is_empty() {
        return Err(ValidationError::Required {
            field: "to".to_string(),
        }
        .into());
    }

    let source_idx = find_row_with_stock(items, lot, from, request.quantity)?;
    let destination_idx = items
        .iter()
        .position(|item| item.is_active() && item.is_lot_at(lot, to));

    // Everything below is infallible.
    let moved_weight = items[source_idx].weight_per_bag() * request.quantity;
    let source = &mut items[source_idx];
    source.quantity -= request.quantity;
    source.remaining_quantity -= request.quantity;
    source.net_weight = (source.net_weight - moved_weight).max(0.0);
    refresh_sold_out(source);
    let source_snapshot = source.clone();

    let (destination_id, created_destination) = match destination_idx {
        Some(idx) => {
            let destination = &mut items[idx];
            destination.quantity += request.quantity;
            destination.remaining_quantity += request.quantity;
            destination.net_weight += moved_weight;
            refresh_sold_out(destination);
            (destination.id.clone(), false)
        }
        None => {
            let destination = InventoryItem {
                id: generate_id(INVENTORY_ID_PREFIX),
                purchase_id: source_snapshot.purchase_id.clone(),
                lot_number: source_snapshot.lot_number.clone(),
                location: to.to_string(),
                quantity: request.quantity,
                remaining_quantity: request.quantity,
                net_weight: moved_weight,
                rate: source_snapshot.rate,
                purchase_rate: source_snapshot.purchase_rate,
                final_cost: source_snapshot.final_cost,
                is_deleted: false,
                is_sold_out: false,
                date_added: request.date.clone(),
            };
            let id = destination.id.clone();
            items.push(destination);
            (id, true)
        }
    };

    Ok(TransferOutcome {
        source_id: source_snapshot.id,
        destination_id,
        created_destination,
    })
}

// =============================================================================
// Sales
// =============================================================================

/// Takes `quantity` bags out of the lot's row at `location` for a sale.
///
/// Only bags are compared. Returns the id of the decremented row.
pub fn decrement_for_sale(
    items: &mut [InventoryItem],
    lot_number: &str,
    location: &str,
    quantity: f64,
) -> CoreResult<String> {
    validate_quantity("quantity", quantity)?;
    let idx = find_row_with_stock(items, lot_number.trim(), location.trim(), quantity)?;
    Ok(take_bags(&mut items[idx], quantity))
}

/// [`decrement_for_sale`] that also checks the sale's kilograms against the
/// row's [`remaining_weight`](InventoryItem::remaining_weight).
///
/// A sale or row without a recorded weight is checked on bags only.
pub fn decrement_for_sale_by_weight(
    items: &mut [InventoryItem],
    lot_number: &str,
    location: &str,
    quantity: f64,
    net_weight: f64,
) -> CoreResult<String> {
    validate_quantity("quantity", quantity)?;
    let lot = lot_number.trim();
    let location = location.trim();
    let idx = find_row_with_stock(items, lot, location, quantity)?;

    let available = items[idx].remaining_weight();
    if net_weight > 0.0 && items[idx].net_weight > 0.0 && net_weight > available + WEIGHT_TOLERANCE {
        return Err(CoreError::InsufficientWeight {
            lot_number: lot.to_string(),
            location: location.to_string(),
            available,
            requested: net_weight,
        });
    }
    Ok(take_bags(&mut items[idx], quantity))
}

fn take_bags(row: &mut InventoryItem, quantity: f64) -> String {
    row.remaining_quantity -= quantity;
    if row.remaining_quantity.abs() < EPSILON {
        row.remaining_quantity = 0.0;
    }
    refresh_sold_out(row);
    row.id.clone()
}

/// Result of putting sold bags back into stock.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    pub item_id: String,
    /// Bags that did not fit under the row's `quantity` and were dropped.
    pub overflow: f64,
}

impl RestoreOutcome {
    pub fn was_clamped(&self) -> bool {
        self.overflow > EPSILON
    }
}

/// Inverse of [`decrement_for_sale`]: returns bags to the lot's row at `location`.
///
/// `remainingQuantity` never exceeds `quantity`; any excess is reported in
/// [`RestoreOutcome::overflow`] so the caller can log it.
pub fn restore_for_sale_deletion(
    items: &mut [InventoryItem],
    lot_number: &str,
    location: &str,
    quantity: f64,
) -> CoreResult<RestoreOutcome> {
    validate_quantity("quantity", quantity)?;
    let lot = lot_number.trim();
    let location = location.trim();

    let candidates: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_active() && item.is_lot_at(lot, location))
        .map(|(idx, _)| idx)
        .collect();

    // Prefer a row that has actually had bags taken out.
    let idx = candidates
        .iter()
        .copied()
        .find(|&idx| items[idx].quantity - items[idx].remaining_quantity > EPSILON)
        .or_else(|| candidates.first().copied())
        .ok_or_else(|| CoreError::LotNotFound {
            lot_number: lot.to_string(),
            location: location.to_string(),
        })?;

    let row = &mut items[idx];
    let wanted = row.remaining_quantity + quantity;
    let capped = wanted.min(row.quantity);
    row.remaining_quantity = capped;
    refresh_sold_out(row);

    Ok(RestoreOutcome {
        item_id: row.id.clone(),
        overflow: (wanted - capped).max(0.0),
    })
}

/// Bags of a lot still available at a location.
pub fn available_at(items: &[InventoryItem], lot_number: &str, location: &str) -> f64 {
    items
        .iter()
        .filter(|item| item.is_active() && item.is_lot_at(lot_number.trim(), location.trim()))
        .map(|item| item.remaining_quantity)
        .sum()
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Active purchases sharing a lot number, one warning per shared lot.
pub fn duplicate_lots(purchases: &[Purchase]) -> Vec<DuplicateLotWarning> {
    let mut by_lot: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for purchase in purchases.iter().filter(|p| p.is_active()) {
        let lot = purchase.lot_number.trim();
        if lot.is_empty() {
            continue;
        }
        by_lot.entry(lot).or_default().push(purchase.id.clone());
    }

    by_lot
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(lot, purchase_ids)| DuplicateLotWarning {
            lot_number: lot.to_string(),
            purchase_ids,
        })
        .collect()
}

/// Per-location stock of one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LocationStock {
    pub location: String,
    pub quantity: f64,
    pub remaining_quantity: f64,
    pub net_weight: f64,
}

/// Totals for one lot across all locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LotSummary {
    pub lot_number: String,
    pub total_quantity: f64,
    pub total_remaining: f64,
    pub locations: Vec<LocationStock>,
}

pub fn lot_summary(items: &[InventoryItem], lot_number: &str) -> LotSummary {
    let lot = lot_number.trim();
    let mut locations: Vec<LocationStock> = Vec::new();

    for item in items.iter().filter(|i| i.is_active() && i.lot_number == lot) {
        match locations
            .iter_mut()
            .find(|l| l.location.eq_ignore_ascii_case(&item.location))
        {
            Some(stock) => {
                stock.quantity += item.quantity;
                stock.remaining_quantity += item.remaining_quantity;
                stock.net_weight += item.net_weight;
            }
            None => locations.push(LocationStock {
                location: item.location.clone(),
                quantity: item.quantity,
                remaining_quantity: item.remaining_quantity,
                net_weight: item.net_weight,
            }),
        }
    }

    LotSummary {
        lot_number: lot.to_string(),
        total_quantity: locations.iter().map(|l| l.quantity).sum(),
        total_remaining: locations.iter().map(|l| l.remaining_quantity).sum(),
        locations,
    }
}

/// A broken stock invariant found by [`verify_conservation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConservationViolation {
    /// `remainingQuantity` outside `0..=quantity`.
    #[serde(rename_all = "camelCase")]
    RemainingOutOfRange {
        item_id: String,
        quantity: f64,
        remaining_quantity: f64,
    },
    /// `isSoldOut` disagrees with `remainingQuantity`.
    #[serde(rename_all = "camelCase")]
    SoldOutFlagMismatch { item_id: String },
    /// Lot-wide remaining exceeds lot-wide quantity.
    #[serde(rename_all = "camelCase")]
    LotOverflow {
        lot_number: String,
        total_quantity: f64,
        total_remaining: f64,
    },
}

/// Checks every active row and lot against the stock invariants.
pub fn verify_conservation(items: &[InventoryItem]) -> Vec<ConservationViolation> {
    let mut violations = Vec::new();
    let mut lots: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for item in items.iter().filter(|i| i.is_active()) {
        if item.remaining_quantity < -EPSILON || item.remaining_quantity > item.quantity + EPSILON {
            violations.push(ConservationViolation::RemainingOutOfRange {
                item_id: item.id.clone(),
                quantity: item.quantity,
                remaining_quantity: item.remaining_quantity,
            });
        }
        if item.is_sold_out != (item.remaining_quantity <= EPSILON) {
            violations.push(ConservationViolation::SoldOutFlagMismatch {
                item_id: item.id.clone(),
            });
        }
        let totals = lots.entry(item.lot_number.as_str()).or_insert((0.0, 0.0));
        totals.0 += item.quantity;
        totals.1 += item.remaining_quantity;
    }

    for (lot, (quantity, remaining)) in lots {
        if remaining > quantity + EPSILON {
            violations.push(ConservationViolation::LotOverflow {
                lot_number: lot.to_string(),
                total_quantity: quantity,
                total_remaining: remaining,
            });
        }
    }

    violations
}

// =============================================================================
// Helpers
// =============================================================================

fn refresh_sold_out(item: &mut InventoryItem) {
    item.is_sold_out = item.remaining_quantity <= EPSILON;
}

/// Index of the first active row of `lot` at `location` holding at least `quantity` bags.
fn find_row_with_stock(items: &[InventoryItem], lot: &str, location: &str, quantity: f64) -> CoreResult<usize> {
    let mut available: Option<f64> = None;
    for (idx, item) in items.iter().enumerate() {
        if !item.is_active() || !item.is_lot_at(lot, location) {
            continue;
        }
        if item.remaining_quantity + EPSILON >= quantity {
            return Ok(idx);
        }
        available = Some(available.map_or(item.remaining_quantity, |a: f64| a.max(item.remaining_quantity)));
    }

    match available {
        Some(available) => Err(CoreError::InsufficientStock {
            lot_number: lot.to_string(),
            location: location.to_string(),
            available,
            requested: quantity,
        }),
        None => Err(CoreError::LotNotFound {
            lot_number: lot.to_string(),
            location: location.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, lot: &str, location: &str, quantity: f64, remaining: f64, weight: f64) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            purchase_id: Some("p1".to_string()),
            lot_number: lot.to_string(),
            location: location.to_string(),
            quantity,
            remaining_quantity: remaining,
            net_weight: weight,
            rate: 50.0,
            purchase_rate: 50.0,
            final_cost: 52.0,
            is_deleted: false,
            is_sold_out: remaining <= 0.0,
            date_added: "2024-03-01".to_string(),
        }
    }

    fn request(from: &str, to: &str, quantity: f64) -> TransferRequest {
        TransferRequest {
            lot_number: "LOT-1".to_string(),
            from: from.to_string(),
            to: to.to_string(),
            quantity,
            date: "2024-03-05".to_string(),
        }
    }

    fn total_quantity(items: &[InventoryItem]) -> f64 {
        items.iter().filter(|i| i.is_active()).map(|i| i.quantity).sum()
    }

    fn purchase() -> Purchase {
        serde_json::from_value(json!({
            "id": "p1",
            "date": "2024-03-01",
            "lotNumber": "LOT-1",
            "party": "supplier-1",
            "quantity": 100,
            "netWeight": 1000,
            "rate": 50,
            "totalAmount": 50000,
            "expenses": 2000,
            "totalAfterExpenses": 52000,
            "location": "Godown A"
        }))
        .unwrap()
    }

    #[test]
    fn test_materialize() {
        let item = materialize(&purchase(), "2024-03-01").unwrap();
        assert!(item.id.starts_with("inv-"));
        assert_eq!(item.purchase_id.as_deref(), Some("p1"));
        assert_eq!(item.remaining_quantity, 100.0);
        assert_eq!(item.final_cost, 52.0);
        assert!(!item.is_sold_out);
    }

    #[test]
    fn test_materialize_rejects_inventorized_and_deleted() {
        let mut p = purchase();
        p.is_inventorized = true;
        assert_eq!(
            materialize(&p, "2024-03-01"),
            Err(CoreError::AlreadyInventorized("p1".to_string()))
        );

        let mut p = purchase();
        p.is_deleted = true;
        assert!(matches!(materialize(&p, "2024-03-01"), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_transfer_to_new_location() {
        let mut items = vec![row("a", "LOT-1", "Godown A", 100.0, 100.0, 1000.0)];
        let outcome = transfer(&mut items, &request("Godown A", "Shop", 30.0)).unwrap();

        assert!(outcome.created_destination);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 70.0);
        assert_eq!(items[0].remaining_quantity, 70.0);
        assert_eq!(items[0].net_weight, 700.0);
        assert_eq!(items[1].location, "Shop");
        assert_eq!(items[1].quantity, 30.0);
        assert_eq!(items[1].remaining_quantity, 30.0);
        assert_eq!(items[1].net_weight, 300.0);
        assert_eq!(items[1].final_cost, 52.0);
        assert_eq!(items[1].date_added, "2024-03-05");
        assert_eq!(total_quantity(&items), 100.0);
    }

    #[test]
    fn test_transfer_into_existing_row() {
        let mut items = vec![
            row("a", "LOT-1", "Godown A", 60.0, 60.0, 600.0),
            row("b", "LOT-1", "Shop", 40.0, 10.0, 400.0),
        ];
        let outcome = transfer(&mut items, &request("Godown A", "shop", 60.0)).unwrap();

        assert!(!outcome.created_destination);
        assert_eq!(outcome.destination_id, "b");
        assert_eq!(items[0].remaining_quantity, 0.0);
        assert!(items[0].is_sold_out);
        assert_eq!(items[1].quantity, 100.0);
        assert_eq!(items[1].remaining_quantity, 70.0);
        assert_eq!(total_quantity(&items), 100.0);
    }

    #[test]
    fn test_failed_transfer_leaves_rows_unchanged() {
        let original = vec![row("a", "LOT-1", "Godown A", 100.0, 20.0, 1000.0)];

        let mut items = original.clone();
        let err = transfer(&mut items, &request("Godown A", "Shop", 50.0)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientStock {
                lot_number: "LOT-1".to_string(),
                location: "Godown A".to_string(),
                available: 20.0,
                requested: 50.0,
            }
        );
        assert_eq!(items, original);

        assert!(matches!(
            transfer(&mut items, &request("Godown A", "Godown A", 5.0)),
            Err(CoreError::SameLocation { .. })
        ));
        assert!(transfer(&mut items, &request("Godown A", "Shop", 0.0)).is_err());
        assert!(matches!(
            transfer(&mut items, &request("Nowhere", "Shop", 5.0)),
            Err(CoreError::LotNotFound { .. })
        ));
        assert_eq!(items, original);
    }

    #[test]
    fn test_transfer_skips_deleted_rows() {
        let mut deleted = row("a", "LOT-1", "Godown A", 100.0, 100.0, 1000.0);
        deleted.is_deleted = true;
        let mut items = vec![deleted];
        assert!(transfer(&mut items, &request("Godown A", "Shop", 10.0)).is_err());
    }

    #[test]
    fn test_decrement_and_restore() {
        let mut items = vec![row("a", "LOT-1", "Godown A", 10.0, 10.0, 100.0)];

        decrement_for_sale(&mut items, "LOT-1", "Godown A", 10.0).unwrap();
        assert_eq!(items[0].remaining_quantity, 0.0);
        assert!(items[0].is_sold_out);

        assert!(matches!(
            decrement_for_sale(&mut items, "LOT-1", "Godown A", 1.0),
            Err(CoreError::InsufficientStock { .. })
        ));

        let outcome = restore_for_sale_deletion(&mut items, "LOT-1", "Godown A", 4.0).unwrap();
        assert!(!outcome.was_clamped());
        assert_eq!(items[0].remaining_quantity, 4.0);
        assert!(!items[0].is_sold_out);
    }

    #[test]
    fn test_sale_weight_checked_against_remaining_bags() {
        // 10 bags of 50 kg, 6 left
        let mut items = vec![row("a", "LOT-1", "Godown A", 10.0, 6.0, 500.0)];

        let err = decrement_for_sale_by_weight(&mut items, "LOT-1", "Godown A", 2.0, 301.0).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientWeight { available, .. } if available == 300.0));
        assert_eq!(items[0].remaining_quantity, 6.0);

        decrement_for_sale_by_weight(&mut items, "LOT-1", "Godown A", 6.0, 300.0).unwrap();
        assert_eq!(items[0].remaining_quantity, 0.0);

        let mut unweighed = vec![row("b", "LOT-2", "Shop", 5.0, 5.0, 0.0)];
        assert!(decrement_for_sale_by_weight(&mut unweighed, "LOT-2", "Shop", 1.0, 900.0).is_ok());
    }

    #[test]
    fn test_restore_clamps_to_quantity() {
        let mut items = vec![row("a", "LOT-1", "Godown A", 10.0, 8.0, 100.0)];
        let outcome = restore_for_sale_deletion(&mut items, "LOT-1", "Godown A", 5.0).unwrap();
        assert!(outcome.was_clamped());
        assert_eq!(outcome.overflow, 3.0);
        assert_eq!(items[0].remaining_quantity, 10.0);
    }

    #[test]
    fn test_duplicate_lots() {
        let mut second = purchase();
        second.id = "p2".to_string();
        let mut deleted = purchase();
        deleted.id = "p3".to_string();
        deleted.is_deleted = true;
        let mut other = purchase();
        other.id = "p4".to_string();
        other.lot_number = "LOT-2".to_string();

        let warnings = duplicate_lots(&[purchase(), second, deleted, other]);
        assert_eq!(
            warnings,
            vec![DuplicateLotWarning {
                lot_number: "LOT-1".to_string(),
                purchase_ids: vec!["p1".to_string(), "p2".to_string()],
            }]
        );
    }

    #[test]
    fn test_lot_summary_and_conservation() {
        let mut items = vec![row("a", "LOT-1", "Godown A", 100.0, 100.0, 1000.0)];
        transfer(&mut items, &request("Godown A", "Shop", 25.0)).unwrap();
        decrement_for_sale(&mut items, "LOT-1", "Shop", 5.0).unwrap();

        let summary = lot_summary(&items, "LOT-1");
        assert_eq!(summary.total_quantity, 100.0);
        assert_eq!(summary.total_remaining, 95.0);
        assert_eq!(summary.locations.len(), 2);
        assert!(verify_conservation(&items).is_empty());

        items[0].remaining_quantity = 200.0;
        let violations = verify_conservation(&items);
        assert!(violations
            .iter()
            .any(|v| matches!(v, ConservationViolation::RemainingOutOfRange { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, ConservationViolation::LotOverflow { .. })));
    }
}
