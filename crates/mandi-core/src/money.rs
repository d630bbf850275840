//! # Money Module
//!
//! Provides the `Money` type used to accumulate rupee amounts.
//!
//! ## Why Integer Paise?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Records are persisted as JSON numbers (₹52.35/kg, 1000.5 kg).          │
//! │  Summing hundreds of them as f64 drifts:                                │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │                                                                         │
//! │  OUR SOLUTION: round each record to paise ONCE, then add integers       │
//! │    Money::from_rupees(52000.0) - Money::from_rupees(20000.0)            │
//! │      = 3_200_000 paise = ₹32000.00 exactly                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The persisted format stays floating point (it is shared with the UI); only
//! aggregation goes through `Money`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A rupee amount in paise (1/100 rupee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from paise.
    #[inline]
    pub const fn from_paise(paise: i64) -> Self {
        Money(paise)
    }

    /// Converts a persisted rupee amount, rounding half away from zero to paise.
    ///
    /// Non-finite input (NaN from a corrupt record) counts as zero.
    ///
    /// ```rust
    /// use mandi_core::money::Money;
    ///
    /// assert_eq!(Money::from_rupees(52.5).paise(), 5250);
    /// assert_eq!(Money::from_rupees(f64::NAN).paise(), 0);
    /// ```
    pub fn from_rupees(rupees: f64) -> Self {
        if !rupees.is_finite() {
            return Money::zero();
        }
        Money((rupees * 100.0).round() as i64)
    }

    /// Returns the value in paise.
    #[inline]
    pub const fn paise(&self) -> i64 {
        self.0
    }

    /// Returns the value as rupees, for the persisted/derived JSON shape.
    #[inline]
    pub fn rupees(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Applies a percentage rate (1.5 = 1.5%), rounded to paise.
    ///
    /// Used for broker commission when a sale carries no explicit amount.
    pub fn percent(&self, rate: f64) -> Money {
        if !rate.is_finite() {
            return Money::zero();
        }
        Money((self.0 as f64 * rate / 100.0).round() as i64)
    }
}

/// Display as `₹1234.50` (debugging; the UI does its own locale formatting).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}₹{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}
