//! # Periods
//!
//! Date parsing and calendar grouping for the ledger.
//!
//! Dates are persisted as strings written by the UI. Most are `yyyy-MM-dd`,
//! older records carry full ISO timestamps, and a few were typed by hand as
//! `dd/MM/yyyy`. Anything else is treated as "no date" by the aggregations.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Parses a persisted date string, returning `None` for missing or malformed input.
///
/// ```rust
/// use mandi_core::period::parse_date;
///
/// assert!(parse_date("2024-03-15").is_some());
/// assert!(parse_date("2024-03-15T10:30:00.000Z").is_some());
/// assert!(parse_date("15/03/2024").is_some());
/// assert!(parse_date("not a date").is_none());
/// ```
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.date());
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

/// A calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(date: NaiveDate) -> Self {
        MonthKey {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Display label in `MMMM yyyy` form, e.g. `"March 2024"`.
    pub fn label(&self) -> String {
        match NaiveDate::from_ymd_opt(self.year, self.month, 1) {
            Some(first) => first.format("%B %Y").to_string(),
            None => format!("{:02}/{}", self.month, self.year),
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DateRange {
    #[ts(as = "String")]
    pub start: NaiveDate,
    #[ts(as = "String")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// The Indian financial year (1 April – 31 March) containing `date`.
    pub fn financial_year_of(date: NaiveDate) -> Self {
        let start_year = if date.month() >= 4 {
            date.year()
        } else {
            date.year() - 1
        };
        Self::financial_year_starting(start_year)
    }

    /// The financial year that starts on 1 April of `start_year`.
    pub fn financial_year_starting(start_year: i32) -> Self {
        // 1 April and 31 March exist in every year chrono supports.
        let start = NaiveDate::from_ymd_opt(start_year, 4, 1).unwrap_or(NaiveDate::MIN);
        let end = NaiveDate::from_ymd_opt(start_year + 1, 3, 31).unwrap_or(NaiveDate::MAX);
        DateRange { start, end }
    }
}

/// Financial year label such as `"2024-25"`.
pub fn financial_year_label(start_year: i32) -> String {
    format!("{}-{:02}", start_year, (start_year + 1) % 100)
}
