//! # Error Types
//!
//! Domain-specific error types for mandi-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mandi-core errors (this file)                                         │
//! │  ├── CoreError        - Ledger rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  mandi-store errors (separate crate)                                   │
//! │  └── StoreError       - Storage / config failures, wraps CoreError     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StoreError → UI message           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant is returned as a value. Nothing in the ledger panics on bad
//! input; the UI decides how to present the failure.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations and consistency hazards.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// Not enough remaining bags in the lot row to cover the request.
    ///
    /// ## When This Occurs
    /// - Selling more bags than a lot-location row still holds
    /// - Transferring more bags than the source row holds
    #[error("Insufficient stock for lot {lot_number} at {location}: available {available}, requested {requested}")]
    InsufficientStock {
        lot_number: String,
        location: String,
        available: f64,
        requested: f64,
    },

    /// The sale weighs more than the bags left in the row.
    #[error("Insufficient weight for lot {lot_number} at {location}: available {available} kg, requested {requested} kg")]
    InsufficientWeight {
        lot_number: String,
        location: String,
        available: f64,
        requested: f64,
    },

    /// No active inventory row for the lot at the location.
    #[error("Lot {lot_number} not found at {location}")]
    LotNotFound { lot_number: String, location: String },

    /// Transfer source and destination are the same location.
    #[error("Cannot transfer lot {lot_number}: source and destination are both {location}")]
    SameLocation { lot_number: String, location: String },

    /// The purchase has already been materialized into inventory.
    #[error("Purchase {0} has already been added to inventory")]
    AlreadyInventorized(String),

    /// A record referenced by id does not exist (or is soft-deleted).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Deleting an inventory row requires an explicit confirmation.
    #[error("Deleting inventory row {0} requires confirmation")]
    ConfirmationRequired(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements and are
/// raised before any state is touched.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., a second supplier with the same name).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
