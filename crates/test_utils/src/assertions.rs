//! Custom Test Assertions
//!
//! Assertion helpers for ledger types with messages that show the figures
//! involved.

use core_kernel::{LedgerEvent, Money};
use domain_billing::{Allocation, Bill, PaymentState, PaymentStatus};

/// Asserts that a bill's allocations add up to its total exactly
pub fn assert_allocations_cover(bill: &Bill, allocations: &[Allocation]) {
    let sum: Money = allocations.iter().map(|a| a.allocated_amount).sum();
    assert_eq!(
        sum, bill.total_amount,
        "Allocations for {} sum to {}, bill total is {}",
        bill.id, sum, bill.total_amount
    );
    assert!(
        allocations.iter().all(|a| a.bill_id == bill.id),
        "Allocation set for {} contains rows of another bill",
        bill.id
    );
}

/// Asserts the allocated amount of one subject
pub fn assert_allocated(allocations: &[Allocation], subject: impl Into<domain_billing::Subject>, expected: Money) {
    let subject = subject.into();
    let allocated = allocations
        .iter()
        .find(|a| a.subject == subject)
        .map(|a| a.allocated_amount);
    assert_eq!(
        allocated,
        Some(expected),
        "Expected {} to be allocated {}, got {:?}",
        subject,
        expected,
        allocated
    );
}

/// Asserts a bill's derived payment figures
pub fn assert_payment_status(status: &PaymentStatus, paid: Money, remaining: Money, state: PaymentState) {
    assert_eq!(
        (status.total_paid, status.remaining, status.status),
        (paid, remaining, state),
        "Payment status of {} differs: paid={}, remaining={}, status={:?}",
        status.bill_id,
        status.total_paid,
        status.remaining,
        status.status
    );
}

/// Asserts that `events` contains exactly the given event names, in order
pub fn assert_event_names(events: &[LedgerEvent], expected: &[&str]) {
    let names: Vec<&str> = events.iter().map(LedgerEvent::name).collect();
    assert_eq!(names, expected, "Published events differ");
}
