//! Billing domain errors

use thiserror::Error;

use core_kernel::{AccessDenied, BillId, MoneyError, StoreError};

/// Errors that can occur in the billing domain
///
/// Every variant is returned before anything is committed; a failed
/// operation never leaves partial rows behind.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lifecycle precondition violated
    #[error("Invalid state transition: cannot {action} {entity} {id} while {from}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        action: &'static str,
    },

    /// Neither consumptions nor active participants exist for the bill
    #[error("Bill {0} has no eligible allocation subjects")]
    NoAllocationSubjects(BillId),

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// The unit of work lost a serialization race; the caller may retry
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AccessDenied),

    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Operation {operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("Operation {0} was cancelled")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: impl ToString,
        from: impl ToString,
        action: &'static str,
    ) -> Self {
        BillingError::InvalidStateTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            action,
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, BillingError::InvalidStateTransition { .. })
    }
}

impl From<StoreError> for BillingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { message } => BillingError::ConcurrencyConflict(message),
            StoreError::Timeout {
                operation,
                duration_ms,
            } => BillingError::Timeout {
                operation,
                duration_ms,
            },
            StoreError::Cancelled { operation } => BillingError::Cancelled(operation),
            other => BillingError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_concurrency_conflict() {
        let error: BillingError = StoreError::conflict("could not serialize access").into();
        assert!(matches!(error, BillingError::ConcurrencyConflict(_)));
    }

    #[test]
    fn test_other_store_errors_stay_opaque() {
        let error: BillingError = StoreError::internal("disk full").into();
        assert!(matches!(error, BillingError::Storage(_)));
    }

    #[test]
    fn test_invalid_transition_message() {
        let error = BillingError::invalid_transition("bill", "BIL-1", "posted", "post");
        assert_eq!(
            error.to_string(),
            "Invalid state transition: cannot post bill BIL-1 while posted"
        );
    }
}
