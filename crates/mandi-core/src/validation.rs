//! # Validation Module
//!
//! Input validation for ledger operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Forms (TypeScript)                                           │
//! │  ├── Required fields, numeric inputs                                   │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repositories / Ledger (Rust)                                 │
//! │  └── THIS MODULE: names, quantities, dates, uniqueness                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Lenient decoding                                             │
//! │  └── Bad numbers read as 0, undecodable records skipped                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use mandi_core::validation::{validate_name, validate_quantity};
//!
//! validate_name("supplier name", "Shree Traders").unwrap();
//! validate_quantity("quantity", 25.0).unwrap();
//! ```

use crate::error::ValidationError;
use crate::period::parse_date;
use crate::MAX_NAME_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a master or location name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most [`MAX_NAME_LENGTH`] characters
///
/// ## Returns
/// The trimmed name.
pub fn validate_name(field: &str, name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LENGTH,
        });
    }

    Ok(name.to_string())
}

/// Validates a lot number: required, no surrounding whitespace kept.
pub fn validate_lot_number(lot_number: &str) -> ValidationResult<String> {
    let lot = lot_number.trim();
    if lot.is_empty() {
        return Err(ValidationError::Required {
            field: "lotNumber".to_string(),
        });
    }
    Ok(lot.to_string())
}

/// Validates a transaction date string.
///
/// ```rust
/// use mandi_core::validation::validate_date;
///
/// assert!(validate_date("date", "2024-03-15").is_ok());
/// assert!(validate_date("date", "yesterday").is_err());
/// ```
pub fn validate_date(field: &str, date: &str) -> ValidationResult<()> {
    if date.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    parse_date(date)
        .map(|_| ())
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "expected yyyy-MM-dd".to_string(),
        })
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a bag quantity for a sale or transfer: finite and strictly positive.
pub fn validate_quantity(field: &str, quantity: f64) -> ValidationResult<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a commission percentage (0–100).
pub fn validate_commission_rate(rate: f64) -> ValidationResult<()> {
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(ValidationError::InvalidFormat {
            field: "commissionRate".to_string(),
            reason: "must be between 0 and 100".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Uniqueness
// =============================================================================

/// Rejects `candidate` when any of `existing` equals it case-insensitively.
///
/// Callers pass only the names of active records of the same kind.
///
/// ```rust
/// use mandi_core::validation::ensure_unique_name;
///
/// let names = ["Shree Traders", "Ram & Sons"];
/// assert!(ensure_unique_name("supplier name", "shree traders", names.iter().copied()).is_err());
/// assert!(ensure_unique_name("supplier name", "Shree Agro", names.iter().copied()).is_ok());
/// ```
pub fn ensure_unique_name<'a>(
    field: &str,
    candidate: &str,
    existing: impl IntoIterator<Item = &'a str>,
) -> ValidationResult<()> {
    let wanted = candidate.trim().to_lowercase();
    if existing
        .into_iter()
        .any(|name| name.trim().to_lowercase() == wanted)
    {
        return Err(ValidationError::Duplicate {
            field: field.to_string(),
            value: candidate.trim().to_string(),
        });
    }
    Ok(())
}
