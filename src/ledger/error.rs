//! Ledger error taxonomy.

use rust_decimal::Decimal;

use crate::storage::StorageError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the ledger engine and sweeper.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed input. Caller's fault; retrying will not help.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Business-rule rejection. Nothing was written.
    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: Decimal, available: Decimal },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The journal disagrees with itself. Nothing was written.
    #[error("Ledger consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StorageError),
}

impl LedgerError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    /// Rejections caused by the request itself rather than infrastructure.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(_)
                | LedgerError::InsufficientPoints { .. }
                | LedgerError::NotFound(_)
        )
    }

    /// Whether the caller may reasonably retry the same request.
    ///
    /// Only transient store failures qualify. The ledger retries journal
    /// conflicts itself a few times before surfacing one.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
