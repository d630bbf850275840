//! End-to-end checks of the ledger's stock, storage and backup guarantees.

use std::sync::Arc;
use std::time::Duration;

use mandi_core::{BalanceType, CoreError, PartyType, Payment, ProfitScope, Purchase, Sale, TransferRequest};
use mandi_store::repository::NewMaster;
use mandi_store::{keys, CacheLayer, ChangeBus, KeyValueStorage, LedgerConfig, StorageEngine, StoreError};
use serde_json::{json, Value};
use uuid::Uuid;

fn config() -> LedgerConfig {
    LedgerConfig::in_memory().flush_delay(Duration::from_millis(10))
}

async fn engine() -> Arc<StorageEngine> {
    StorageEngine::open(config()).await.unwrap()
}

fn purchase(lot: &str, bags: f64, net_weight: f64, rate: f64, location: &str, supplier: &str) -> Purchase {
    serde_json::from_value(json!({
        "id": "",
        "date": "2024-03-10",
        "lotNumber": lot,
        "party": supplier,
        "quantity": bags,
        "netWeight": net_weight,
        "rate": rate,
        "location": location
    }))
    .unwrap()
}

fn sale(lot: &str, bags: f64, net_weight: f64, rate: f64, location: &str) -> Sale {
    serde_json::from_value(json!({
        "id": "",
        "date": "2024-04-15",
        "lotNumber": lot,
        "customerId": "customer-1",
        "location": location,
        "quantity": bags,
        "netWeight": net_weight,
        "rate": rate
    }))
    .unwrap()
}

fn transfer(lot: &str, from: &str, to: &str, quantity: f64) -> TransferRequest {
    TransferRequest {
        lot_number: lot.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        quantity,
        date: "2024-04-01".to_string(),
    }
}

// =============================================================================
// Inventory
// =============================================================================

#[tokio::test]
async fn transfers_and_sales_conserve_lot_quantity() {
    let engine = engine().await;
    let ledger = engine.ledger();
    ledger
        .record_purchase(purchase("LOT-1", 100.0, 5000.0, 52.0, "Godown A", "supplier-1"))
        .await
        .unwrap();

    ledger.transfer(transfer("LOT-1", "Godown A", "Shop", 40.0)).await.unwrap();
    ledger.transfer(transfer("LOT-1", "Shop", "Cold Store", 15.0)).await.unwrap();
    ledger.transfer(transfer("LOT-1", "Cold Store", "Godown A", 5.0)).await.unwrap();
    ledger.record_sale(sale("LOT-1", 20.0, 1000.0, 70.0, "Shop")).await.unwrap();

    let summary = ledger.lot_summary("LOT-1").await;
    assert_eq!(summary.total_quantity, 100.0);
    assert_eq!(summary.total_remaining, 80.0);
    assert_eq!(summary.locations.len(), 3);
    let weight: f64 = summary.locations.iter().map(|l| l.net_weight).sum();
    assert!((weight - 5000.0).abs() < 1e-6);
    assert!(ledger.verify_conservation().await.is_empty());
}

#[tokio::test]
async fn purchase_is_materialized_at_most_once() {
    let engine = engine().await;
    let recorded = engine
        .ledger()
        .record_purchase(purchase("LOT-2", 10.0, 500.0, 40.0, "Godown A", "supplier-1"))
        .await
        .unwrap();

    let err = engine
        .ledger()
        .add_from_purchase(&recorded.purchase.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Core(CoreError::AlreadyInventorized(_))));
    assert_eq!(engine.inventory().get_active().await.len(), 1);
}

#[tokio::test]
async fn over_transfer_fails_and_leaves_rows_unchanged() {
    let engine = engine().await;
    engine
        .ledger()
        .record_purchase(purchase("LOT-3", 10.0, 500.0, 40.0, "Godown A", "supplier-1"))
        .await
        .unwrap();
    let before = engine.inventory().raw().await;

    let err = engine
        .ledger()
        .transfer(transfer("LOT-3", "Godown A", "Shop", 10.5))
        .await
        .unwrap_err();
    assert!(err.is_user_error());

    let same = engine
        .ledger()
        .transfer(transfer("LOT-3", "Godown A", "godown a", 1.0))
        .await
        .unwrap_err();
    assert!(matches!(same, StoreError::Core(CoreError::SameLocation { .. })));

    assert_eq!(engine.inventory().raw().await, before);
}

// =============================================================================
// Storage
// =============================================================================

#[tokio::test]
async fn stored_values_read_back_unchanged() {
    let engine = engine().await;
    let storage = engine.store().storage();
    let values = [
        json!([]),
        json!({}),
        json!({"nested": {"list": [1, "two", {"three": 3.5}], "flag": true, "none": null}}),
        json!("plain string"),
        json!(0),
    ];

    for (i, value) in values.iter().enumerate() {
        let key = format!("roundtrip-{i}");
        assert!(storage.set(&key, value).await);
        assert_eq!(storage.get::<Value>(&key).await.as_ref(), Some(value));

        assert!(engine.store().set_value(&key, value.clone()));
        assert_eq!(engine.store().get_value(&key).await.as_ref(), Some(value));
    }
}

#[tokio::test]
async fn cache_serves_latest_write_within_ttl() {
    let engine = engine().await;
    let pool = engine.store().storage().pool().clone();
    let storage = KeyValueStorage::new(pool, ChangeBus::new(), "cache-test");
    let cache = CacheLayer::new(storage.clone(), Duration::from_secs(30));

    assert!(storage.set("k", &json!("v1")).await);
    assert_eq!(cache.get_cached::<String>("k", true).await.as_deref(), Some("v1"));
    assert!(storage.set("k", &json!("v2")).await);
    assert_eq!(cache.get_cached::<String>("k", true).await.as_deref(), Some("v2"));
}

#[tokio::test]
async fn soft_deleted_records_only_in_get_all() {
    let engine = engine().await;
    let customers = engine.masters(PartyType::Customer);
    let kept = customers.add(NewMaster::named("Ram & Sons")).await.unwrap();
    let gone = customers.add(NewMaster::named("Gupta Stores")).await.unwrap();
    customers.soft_delete(&gone.id).await.unwrap();

    let active: Vec<String> = customers.get_active().await.into_iter().map(|m| m.id).collect();
    let all: Vec<String> = customers.get_all().await.into_iter().map(|m| m.id).collect();
    assert_eq!(active, vec![kept.id.clone()]);
    assert_eq!(all, vec![kept.id, gone.id]);
}

#[tokio::test]
async fn sibling_engine_sees_writes_after_flush() {
    let engine = engine().await;
    let sibling = engine.sibling().await.unwrap();

    engine.locations().add("Godown A").await.unwrap();
    assert!(sibling.locations().list().await.is_empty());

    engine.flush().await.unwrap();
    assert_eq!(sibling.locations().list().await, vec!["Godown A"]);
}

#[tokio::test]
async fn file_database_survives_reopen() {
    let path = std::env::temp_dir().join(format!("mandi-ledger-{}.db", Uuid::new_v4()));
    let config = LedgerConfig::new(&path).backup_interval(None);

    let engine = StorageEngine::open(config.clone()).await.unwrap();
    engine.locations().add("Godown A").await.unwrap();
    engine.dispose().await.unwrap();
    drop(engine);

    let reopened = StorageEngine::open(config).await.unwrap();
    assert_eq!(reopened.locations().list().await, vec!["Godown A"]);
    reopened.dispose().await.unwrap();
    drop(reopened);

    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

// =============================================================================
// Balances & Profit
// =============================================================================

#[tokio::test]
async fn supplier_balance_is_purchases_minus_payments() {
    let engine = engine().await;
    let supplier = engine
        .masters(PartyType::Supplier)
        .add(NewMaster::named("Shree Traders"))
        .await
        .unwrap();
    engine
        .ledger()
        .record_purchase(purchase("LOT-1", 20.0, 1000.0, 52.0, "Godown A", &supplier.id))
        .await
        .unwrap();
    let payment: Payment = serde_json::from_value(json!({
        "id": "pay-1",
        "date": "2024-03-20",
        "partyId": supplier.id,
        "partyType": "supplier",
        "amount": 20000,
        "paymentMode": "upi"
    }))
    .unwrap();
    engine.payments().add(payment).await.unwrap();

    let balance = engine.party_balance(PartyType::Supplier, &supplier.id).await.unwrap();
    assert_eq!(balance.name, "Shree Traders");
    assert_eq!(balance.balance, 32000.0);
    assert_eq!(balance.balance_type, BalanceType::Debit);
}

#[tokio::test]
async fn profit_uses_landed_cost_per_kg() {
    let engine = engine().await;
    engine
        .ledger()
        .record_purchase(purchase("LOT-1", 20.0, 1000.0, 52.0, "Godown A", "supplier-1"))
        .await
        .unwrap();
    engine
        .ledger()
        .record_sale(sale("LOT-1", 8.0, 400.0, 70.0, "Godown A"))
        .await
        .unwrap();

    let report = engine.profit(ProfitScope::All).await;
    assert_eq!(report.by_transaction.len(), 1);
    assert_eq!(report.by_transaction[0].profit, 7200.0);
    assert_eq!(report.total, 7200.0);
    assert_eq!(report.by_month[0].month, "April 2024");

    let march = engine.profit(ProfitScope::Month { year: 2024, month: 3 }).await;
    assert!(march.by_transaction.is_empty());
}

// =============================================================================
// Backup
// =============================================================================

#[tokio::test]
async fn import_of_export_restores_every_key() {
    let source = engine().await;
    source.locations().add("Godown A").await.unwrap();
    source
        .masters(PartyType::Broker)
        .add(NewMaster::named("Mohan"))
        .await
        .unwrap();
    source
        .ledger()
        .record_purchase(purchase("LOT-1", 20.0, 1000.0, 52.0, "Godown A", "supplier-1"))
        .await
        .unwrap();
    source
        .ledger()
        .record_sale(sale("LOT-1", 8.0, 400.0, 70.0, "Godown A"))
        .await
        .unwrap();
    let fy = source.financial_years().add(2024).await.unwrap();
    source.financial_years().set_current(&fy.id).await.unwrap();

    let exported = source.backup().export_snapshot().await.unwrap();

    let target = engine().await;
    assert!(target.backup().import_snapshot(&exported).await);

    for key in keys::DATA_KEYS {
        assert_eq!(
            target.store().get_value(key).await,
            source.store().get_value(key).await,
            "key {key} differs after import"
        );
    }
    assert_eq!(target.profit(ProfitScope::All).await.total, 7200.0);
}

#[tokio::test]
async fn import_of_export_keeps_legacy_records() {
    let source = engine().await;
    let legacy = json!([{"id": "p1", "lotNumber": "LOT-1"}, {"id": 1717000000000u64, "lotNumber": "OLD"}]);
    assert!(source.store().set_value(keys::PURCHASES, legacy.clone()));

    let exported = source.backup().export_snapshot().await.unwrap();
    let target = engine().await;
    assert!(target.backup().import_snapshot(&exported).await);

    assert_eq!(target.store().get_value(keys::PURCHASES).await, Some(legacy));
    assert_eq!(target.purchases().get_all().await.len(), 1);
}

#[tokio::test]
async fn concurrent_location_adds_keep_names_unique() {
    let engine = engine().await;
    let (repo_a, repo_b) = (engine.locations(), engine.locations());
    let (a, b) = tokio::join!(repo_a.add("Godown A"), repo_b.add("godown a"));
    assert!(a.is_ok() != b.is_ok());
    assert_eq!(engine.locations().list().await.len(), 1);
}
