//! # Store Error Types
//!
//! Error types for storage operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error / serde_json::Error / toml / io                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds context and categorization            │
//! │       │                        (CoreError passes through unchanged)     │
//! │       ▼                                                                 │
//! │  UI displays user-friendly message                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Plain reads and writes never surface these: the primitive logs and falls
//! back to `None` / `false`. Only `try_*` calls, configuration loading and the
//! ledger operations return them.

use mandi_core::{CoreError, ValidationError};
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A ledger rule rejected the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A value could not be serialized or a stored value could not be decoded.
    #[error("Serialization failed for key '{key}': {message}")]
    Serialization { key: String, message: String },

    /// A backup document failed validation.
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// No backup is available in either slot.
    #[error("No emergency backup found")]
    NoBackup,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// The engine was disposed.
    #[error("Storage engine is shut down")]
    ShuttingDown,
}

impl StoreError {
    pub fn serialization(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StoreError::Serialization {
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// True when the error is a rule violation the user can correct,
    /// as opposed to a storage fault.
    pub fn is_user_error(&self) -> bool {
        matches!(self, StoreError::Core(_))
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::Core(CoreError::Validation(err))
    }
}

/// ```text
/// sqlx::Error::PoolClosed / PoolTimedOut → ConnectionFailed
/// Other                                  → QueryFailed
/// ```
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("Pool is closed".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::ConnectionFailed("Pool timed out".to_string()),
            sqlx::Error::Database(db_err) => StoreError::QueryFailed(db_err.message().to_string()),
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::ConfigSaveFailed(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_pass_through() {
        let err: StoreError = CoreError::AlreadyInventorized("p1".to_string()).into();
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "Purchase p1 has already been added to inventory");
    }

    #[test]
    fn test_validation_converts() {
        let err: StoreError = ValidationError::Required {
            field: "name".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Core(CoreError::Validation(_))));
    }

    #[test]
    fn test_pool_closed_is_connection_failure() {
        let err: StoreError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, StoreError::ConnectionFailed(_)));
        assert!(!err.is_user_error());
    }
}
