//! Loan domain errors

use thiserror::Error;

use core_kernel::{AccessDenied, LoanId, Money, MoneyError, StoreError};

/// Errors that can occur in the loan domain
#[derive(Debug, Error)]
pub enum LoanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state transition: cannot {action} {entity} {id} while {from}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        action: &'static str,
    },

    /// A repayment larger than what is still owed
    #[error("Loan {loan_id} overpayment: requested {requested}, outstanding {outstanding}")]
    LoanOverpayment {
        loan_id: LoanId,
        requested: Money,
        outstanding: Money,
    },

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

impl LoanError {
    pub fn validation(message: impl Into<String>) -> Self {
        LoanError::Validation(message.into())
    }

    pub fn loan_not_found(id: LoanId) -> Self {
        LoanError::NotFound {
            entity: "loan",
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(id: LoanId, from: impl ToString, action: &'static str) -> Self {
        LoanError::InvalidStateTransition {
            entity: "loan",
            id: id.to_string(),
            from: from.to_string(),
            action,
        }
    }

    pub fn is_overpayment(&self) -> bool {
        matches!(self, LoanError::LoanOverpayment { .. })
    }
}

impl From<StoreError> for LoanError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { message } => LoanError::ConcurrencyConflict(message),
            StoreError::Timeout {
                operation,
                duration_ms,
            } => LoanError::Timeout {
                operation,
                duration_ms,
            },
            StoreError::Cancelled { operation } => LoanError::Cancelled(operation),
            other => LoanError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_overpayment_message() {
        let id = LoanId::new();
        let error = LoanError::LoanOverpayment {
            loan_id: id,
            requested: Money::new(dec!(25.00)),
            outstanding: Money::new(dec!(20.00)),
        };
        assert!(error.is_overpayment());
        assert_eq!(
            error.to_string(),
            format!("Loan {} overpayment: requested 25.00, outstanding 20.00", id)
        );
    }

    #[test]
    fn test_timeout_keeps_its_own_variant() {
        let error: LoanError = StoreError::Timeout {
            operation: "record_loan_payment".to_string(),
            duration_ms: 50,
        }
        .into();
        assert!(matches!(error, LoanError::Timeout { duration_ms: 50, .. }));
    }
}
