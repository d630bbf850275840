//! Financial years (1 April – 31 March) and the currently selected one.

use chrono::{Datelike, NaiveDate};
use mandi_core::period::{financial_year_label, DateRange};
use mandi_core::{generate_id, CoreError, FinancialYear, ValidationError};
use serde_json::Value;
use tracing::{info, warn};

use crate::coalesce::WriteCoalescingStore;
use crate::error::{StoreError, StoreResult};
use crate::keys;

#[derive(Debug, Clone)]
pub struct FinancialYearRepository {
    store: WriteCoalescingStore,
}

impl FinancialYearRepository {
    pub fn new(store: WriteCoalescingStore) -> Self {
        FinancialYearRepository { store }
    }

    pub async fn list(&self) -> Vec<FinancialYear> {
        match self.store.get_value(keys::FINANCIAL_YEARS).await {
            Some(Value::Array(elements)) => elements
                .into_iter()
                .filter_map(|element| match serde_json::from_value::<FinancialYear>(element) {
                    Ok(year) => Some(year),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable financial year");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Adds the financial year starting 1 April of `start_year`.
    pub async fn add(&self, start_year: i32) -> StoreResult<FinancialYear> {
        let _guard = self.store.write_guard().await;
        self.add_locked(start_year).await
    }

    async fn add_locked(&self, start_year: i32) -> StoreResult<FinancialYear> {
        let name = financial_year_label(start_year);
        let mut years = self.list().await;
        if years.iter().any(|y| y.name == name) {
            return Err(ValidationError::Duplicate {
                field: "financial year".to_string(),
                value: name,
            }
            .into());
        }

        let range = DateRange::financial_year_starting(start_year);
        let year = FinancialYear {
            id: generate_id("fy"),
            name,
            start_date: range.start.format("%Y-%m-%d").to_string(),
            end_date: range.end.format("%Y-%m-%d").to_string(),
            is_active: false,
        };
        years.push(year.clone());
        self.write(&years)?;
        info!(name = %year.name, "Financial year added");
        Ok(year)
    }

    /// The selected financial year, if any.
    pub async fn current(&self) -> Option<FinancialYear> {
        let id: String = self.store.get(keys::CURRENT_FINANCIAL_YEAR).await?;
        self.list().await.into_iter().find(|y| y.id == id)
    }

    /// Selects a financial year; exactly one year is flagged active afterwards.
    pub async fn set_current(&self, id: &str) -> StoreResult<FinancialYear> {
        let _guard = self.store.write_guard().await;
        self.set_current_locked(id).await
    }

    async fn set_current_locked(&self, id: &str) -> StoreResult<FinancialYear> {
        let mut years = self.list().await;
        if !years.iter().any(|y| y.id == id) {
            return Err(CoreError::not_found("FinancialYear", id).into());
        }
        for year in years.iter_mut() {
            year.is_active = year.id == id;
        }
        self.write(&years)?;
        if !self.store.set(keys::CURRENT_FINANCIAL_YEAR, id) {
            return Err(StoreError::ShuttingDown);
        }

        let current = years.into_iter().find(|y| y.id == id);
        current.ok_or_else(|| CoreError::not_found("FinancialYear", id).into())
    }

    /// Returns the current year, creating and selecting the one containing
    /// `today` when none is selected.
    pub async fn ensure_current(&self, today: NaiveDate) -> StoreResult<FinancialYear> {
        let _guard = self.store.write_guard().await;
        if let Some(year) = self.current().await {
            return Ok(year);
        }
        let start_year = DateRange::financial_year_of(today).start.year();
        let name = financial_year_label(start_year);

        let year = match self.list().await.into_iter().find(|y| y.name == name) {
            Some(existing) => existing,
            None => self.add_locked(start_year).await?,
        };
        self.set_current_locked(&year.id).await
    }

    fn write(&self, years: &[FinancialYear]) -> StoreResult<()> {
        if self.store.set(keys::FINANCIAL_YEARS, years) {
            Ok(())
        } else {
            Err(StoreError::ShuttingDown)
        }
    }
}
