//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::money::MoneyError;
use core_kernel::ports::StoreError;

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("weight must be positive");
    match error {
        CoreError::Validation(msg) => assert_eq!(msg, "weight must be positive"),
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_core_error_from_money_error() {
    let core_error: CoreError = MoneyError::DivisionByZero.into();
    assert!(matches!(core_error, CoreError::Money(MoneyError::DivisionByZero)));
    assert!(core_error.to_string().contains("Division by zero"));
}

#[test]
fn test_store_error_classification() {
    assert!(StoreError::conflict("deadlock detected").is_conflict());
    assert!(!StoreError::not_found("Loan", "LON-1").is_conflict());
    assert!(StoreError::connection("refused").is_transient());
    assert!(!StoreError::internal("boom").is_transient());
}
