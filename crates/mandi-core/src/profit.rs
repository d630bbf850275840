//! # Profit Engine
//!
//! Per-sale profit with cost allocated from the purchase sharing the sale's lot:
//!
//! ```text
//!   cost/kg        = purchase.totalAfterExpenses / purchase.netWeight
//!   allocatedCost  = cost/kg × sale.netWeight
//!   profit         = sale.totalAmount − allocatedCost
//! ```
//!
//! When several purchases share a lot number the first active one wins; when
//! none does (or its weight is zero) the allocated cost is zero.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::money::Money;
use crate::period::{parse_date, DateRange, MonthKey};
use crate::snapshot::LedgerSnapshot;
use crate::types::{MonthlyProfit, ProfitRecord, ProfitReport, Purchase, Record, Sale};

/// Which sales a profit report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProfitScope {
    /// Every active sale, including ones with unusable dates.
    #[default]
    All,
    Month { year: i32, month: u32 },
    Range(DateRange),
    /// Indian financial year starting 1 April of `start_year`.
    #[serde(rename_all = "camelCase")]
    FinancialYear { start_year: i32 },
}

impl ProfitScope {
    /// True when a sale dated `date` belongs in the report.
    ///
    /// Undated sales only belong to the unfiltered scope.
    pub fn includes(&self, date: Option<chrono::NaiveDate>) -> bool {
        match (self, date) {
            (ProfitScope::All, _) => true,
            (_, None) => false,
            (ProfitScope::Month { year, month }, Some(d)) => MonthKey::of(d) == MonthKey { year: *year, month: *month },
            (ProfitScope::Range(range), Some(d)) => range.contains(d),
            (ProfitScope::FinancialYear { start_year }, Some(d)) => {
                DateRange::financial_year_starting(*start_year).contains(d)
            }
        }
    }
}

/// Builds the profit report for the sales within `scope`.
pub fn calculate_profit(snapshot: &LedgerSnapshot, scope: ProfitScope) -> ProfitReport {
    let mut by_transaction = Vec::new();
    let mut months: BTreeMap<MonthKey, Money> = BTreeMap::new();
    let mut total = Money::zero();

    for sale in snapshot.sales.iter().filter(|s| s.is_active()) {
        let date = parse_date(&sale.date);
        if !scope.includes(date) {
            continue;
        }

        let source = cost_source(&snapshot.purchases, &sale.lot_number);
        let (record, profit) = profit_of(sale, source, date.map(MonthKey::of));

        if let Some(month) = date.map(MonthKey::of) {
            *months.entry(month).or_default() += profit;
        }
        total += profit;
        by_transaction.push(record);
    }

    ProfitReport {
        by_transaction,
        by_month: months
            .into_iter()
            .rev()
            .map(|(month, profit)| MonthlyProfit {
                month: month.label(),
                profit: profit.rupees(),
            })
            .collect(),
        total: total.rupees(),
    }
}

/// First active purchase sharing the lot number.
fn cost_source<'a>(purchases: &'a [Purchase], lot_number: &str) -> Option<&'a Purchase> {
    let lot = lot_number.trim();
    if lot.is_empty() {
        return None;
    }
    purchases
        .iter()
        .find(|p| p.is_active() && p.lot_number.trim() == lot)
}

fn profit_of(sale: &Sale, source: Option<&Purchase>, month: Option<MonthKey>) -> (ProfitRecord, Money) {
    let cost_per_kg = source.map(Purchase::cost_per_kg).unwrap_or(0.0);
    let revenue = Money::from_rupees(sale.total_amount);
    let allocated = Money::from_rupees(cost_per_kg * sale.net_weight);
    let profit = revenue - allocated;

    let record = ProfitRecord {
        sale_id: sale.id.clone(),
        date: sale.date.clone(),
        month: month.map(|m| m.label()),
        lot_number: sale.lot_number.clone(),
        customer_id: sale.customer_id.clone(),
        net_weight: sale.net_weight,
        revenue: revenue.rupees(),
        allocated_cost: allocated.rupees(),
        profit: profit.rupees(),
        purchase_id: source.map(|p| p.id.clone()),
    };
    (record, profit)
}
