//! # Party Balances
//!
//! Running balance of every counterparty, recomputed from the ledger on each
//! read. Nothing here is persisted.
//!
//! ## Balance Rules
//! ```text
//! ┌──────────────┬──────────────────────────────────────┬────────────────┐
//! │ Party type   │ Owed (debit side)                    │ Settled by     │
//! ├──────────────┼──────────────────────────────────────┼────────────────┤
//! │ supplier     │ Σ purchase.totalAfterExpenses        │ payments       │
//! │              │   where purchase.party = id or name  │                │
//! │ agent        │ Σ purchase.totalAfterExpenses        │ payments       │
//! │              │   where purchase.agentId = id        │                │
//! │ customer     │ Σ sale.totalAmount                   │ receipts       │
//! │              │   where sale.customerId = id         │                │
//! │ broker       │ Σ sale.brokerageAmount               │ payments       │
//! │              │   else commissionRate% × totalAmount │                │
//! │ transporter  │ Σ transportCost of sales + purchases │ payments       │
//! └──────────────┴──────────────────────────────────────┴────────────────┘
//! ```
//!
//! Customer balances use the actual `totalAmount`, never a cut-bill
//! `billAmount`.

use crate::money::Money;
use crate::snapshot::LedgerSnapshot;
use crate::types::{BalanceType, Master, PartyBalance, PartyType, Payment, Record};
use crate::DEFAULT_COMMISSION_RATE;

/// Balances of every active master of `party_type`, in master order.
pub fn calculate_party_balances(snapshot: &LedgerSnapshot, party_type: PartyType) -> Vec<PartyBalance> {
    snapshot
        .masters(party_type)
        .iter()
        .filter(|m| m.is_active())
        .map(|master| balance_of(snapshot, party_type, master))
        .collect()
}

/// Balance of a single master by id, `None` when it is unknown or deleted.
pub fn calculate_party_balance(snapshot: &LedgerSnapshot, party_type: PartyType, id: &str) -> Option<PartyBalance> {
    snapshot
        .masters(party_type)
        .iter()
        .find(|m| m.is_active() && m.id == id)
        .map(|master| balance_of(snapshot, party_type, master))
}

fn balance_of(snapshot: &LedgerSnapshot, party_type: PartyType, master: &Master) -> PartyBalance {
    let owed = owed_to_or_by(snapshot, party_type, master);
    let settled = settlements(snapshot, party_type, master);
    let balance = owed - settled;

    PartyBalance {
        id: master.id.clone(),
        name: master.name.clone(),
        party_type,
        balance: balance.rupees(),
        balance_type: if balance.is_negative() {
            BalanceType::Credit
        } else {
            BalanceType::Debit
        },
    }
}

fn owed_to_or_by(snapshot: &LedgerSnapshot, party_type: PartyType, master: &Master) -> Money {
    let purchases = snapshot.purchases.iter().filter(|p| p.is_active());
    let sales = snapshot.sales.iter().filter(|s| s.is_active());

    match party_type {
        PartyType::Supplier => purchases
            .filter(|p| master.is_referenced_by(&p.party))
            .map(|p| Money::from_rupees(p.total_after_expenses))
            .sum(),
        PartyType::Agent => purchases
            .filter(|p| references(master, p.agent_id.as_deref()))
            .map(|p| Money::from_rupees(p.total_after_expenses))
            .sum(),
        PartyType::Customer => sales
            .filter(|s| master.is_referenced_by(&s.customer_id))
            .map(|s| Money::from_rupees(s.total_amount))
            .sum(),
        PartyType::Broker => {
            let rate = master.commission_rate.unwrap_or(DEFAULT_COMMISSION_RATE);
            sales
                .filter(|s| references(master, s.broker_id.as_deref()))
                .map(|s| match s.brokerage_amount {
                    Some(amount) => Money::from_rupees(amount),
                    None => Money::from_rupees(s.total_amount).percent(rate),
                })
                .sum()
        }
        PartyType::Transporter => {
            let from_sales: Money = sales
                .filter(|s| references(master, s.transporter_id.as_deref()))
                .map(|s| Money::from_rupees(s.transport_cost.unwrap_or(0.0)))
                .sum();
            let from_purchases: Money = purchases
                .filter(|p| references(master, p.transporter_id.as_deref()))
                .map(|p| Money::from_rupees(p.transport_cost.unwrap_or(0.0)))
                .sum();
            from_sales + from_purchases
        }
    }
}

fn settlements(snapshot: &LedgerSnapshot, party_type: PartyType, master: &Master) -> Money {
    let ledger: &[Payment] = match party_type {
        PartyType::Customer => &snapshot.receipts,
        _ => &snapshot.payments,
    };

    ledger
        .iter()
        .filter(|p| p.is_active() && p.party_type == party_type && master.is_referenced_by(&p.party_id))
        .map(|p| Money::from_rupees(p.amount))
        .sum()
}

fn references(master: &Master, reference: Option<&str>) -> bool {
    reference.map(|r| master.is_referenced_by(r)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn master(id: &str, name: &str) -> Master {
        Master {
            id: id.to_string(),
            name: name.to_string(),
            commission_rate: None,
            phone: None,
            address: None,
            created_at: None,
            is_deleted: false,
        }
    }

    fn snapshot() -> LedgerSnapshot {
        LedgerSnapshot {
            purchases: serde_json::from_value(json!([
                {"id": "p1", "party": "supplier-1", "agentId": "agent-1", "transporterId": "transporter-1",
                 "totalAfterExpenses": 52000, "transportCost": 800},
                {"id": "p2", "party": "Shree Traders", "totalAfterExpenses": 1000, "isDeleted": true}
            ]))
            .unwrap(),
            sales: serde_json::from_value(json!([
                {"id": "s1", "customerId": "customer-1", "brokerId": "broker-1", "transporterId": "transporter-1",
                 "totalAmount": 28000, "billAmount": 25000, "transportCost": 500},
                {"id": "s2", "customerId": "Ram & Sons", "brokerId": "broker-1",
                 "totalAmount": 10000, "brokerageAmount": 150}
            ]))
            .unwrap(),
            payments: serde_json::from_value(json!([
                {"id": "pay1", "partyId": "supplier-1", "partyType": "supplier", "amount": 20000},
                {"id": "pay2", "partyId": "Shree Traders", "partyType": "supplier", "amount": 500, "isDeleted": true},
                {"id": "pay3", "partyId": "supplier-1", "partyType": "agent", "amount": 999},
                {"id": "pay4", "partyId": "broker-1", "partyType": "broker", "amount": 1000}
            ]))
            .unwrap(),
            receipts: serde_json::from_value(json!([
                {"id": "r1", "partyId": "customer-1", "partyType": "customer", "amount": 30000, "paymentMode": "upi"}
            ]))
            .unwrap(),
            inventory: vec![],
            suppliers: vec![master("supplier-1", "Shree Traders")],
            customers: vec![master("customer-1", "Ram & Sons")],
            brokers: vec![master("broker-1", "Mohan Broker")],
            agents: vec![master("agent-1", "Suresh")],
            transporters: vec![master("transporter-1", "Fast Roadways")],
        }
    }

    #[test]
    fn test_supplier_balance() {
        let balances = calculate_party_balances(&snapshot(), PartyType::Supplier);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].name, "Shree Traders");
        assert_eq!(balances[0].balance, 32000.0);
        assert_eq!(balances[0].balance_type, BalanceType::Debit);
    }

    #[test]
    fn test_capitalised_party_type_payment_counts() {
        let mut snap = snapshot();
        snap.payments = serde_json::from_value(json!([
            {"id": "pay1", "partyId": "supplier-1", "partyType": "Supplier", "amount": 20000},
            {"id": "pay5", "partyId": "supplier-1", "partyType": "suppliers", "amount": 2000}
        ]))
        .unwrap();

        let balance = calculate_party_balance(&snap, PartyType::Supplier, "supplier-1").unwrap();
        assert_eq!(balance.balance, 30000.0);
    }

    #[test]
    fn test_customer_balance_uses_actual_amount() {
        let balance = calculate_party_balance(&snapshot(), PartyType::Customer, "customer-1").unwrap();
        // 28000 + 10000 (matched by name) - 30000
        assert_eq!(balance.balance, 8000.0);
    }

    #[test]
    fn test_broker_commission() {
        let balance = calculate_party_balance(&snapshot(), PartyType::Broker, "broker-1").unwrap();
        // 1% of 28000 + explicit 150 - 1000
        assert_eq!(balance.balance, -570.0);
        assert_eq!(balance.balance_type, BalanceType::Credit);

        let mut snap = snapshot();
        snap.brokers[0].commission_rate = Some(2.0);
        let balance = calculate_party_balance(&snap, PartyType::Broker, "broker-1").unwrap();
        assert_eq!(balance.balance, -290.0);
    }

    #[test]
    fn test_agent_and_transporter() {
        let snap = snapshot();
        let agent = calculate_party_balance(&snap, PartyType::Agent, "agent-1").unwrap();
        assert_eq!(agent.balance, 52000.0);

        let transporter = calculate_party_balance(&snap, PartyType::Transporter, "transporter-1").unwrap();
        assert_eq!(transporter.balance, 1300.0);
    }

    #[test]
    fn test_deleted_master_has_no_balance() {
        let mut snap = snapshot();
        snap.suppliers[0].is_deleted = true;
        assert!(calculate_party_balances(&snap, PartyType::Supplier).is_empty());
        assert!(calculate_party_balance(&snap, PartyType::Supplier, "supplier-1").is_none());
    }

    #[test]
    fn test_zero_balance_is_debit() {
        let mut snap = snapshot();
        snap.payments[0].amount = 52000.0;
        let balance = calculate_party_balance(&snap, PartyType::Supplier, "supplier-1").unwrap();
        assert_eq!(balance.balance, 0.0);
        assert_eq!(balance.balance_type, BalanceType::Debit);
    }
}
