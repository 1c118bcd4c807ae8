//! Billing Domain - Household Bill Splitting
//!
//! This crate owns the life of a shared bill: it is created as a draft,
//! collects consumption readings, is posted (which splits its total across
//! subjects), collects payments, and is eventually closed.
//!
//! # Allocation
//!
//! Posting weights the split by valid consumption when there is any, and
//! otherwise by the active participant roster. Shares are rounded
//! half-to-even to the cent and the leftover cents are handed out by
//! largest rounding error, so allocations always add up to the bill total.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingService, NewBill, BillType};
//!
//! let service = BillingService::new(store, events);
//! let bill = service.create_bill(&ctx, NewBill::new(BillType::Water, start, end, total)).await?;
//! let posted = service.post_bill(&ctx, bill.id).await?;
//! assert_eq!(posted.allocations.iter().map(|a| a.allocated_amount).sum::<Money>(), total);
//! ```

pub mod allocation;
pub mod bill;
pub mod consumption;
pub mod error;
pub mod payment;
pub mod ports;
pub mod recurring;
pub mod scheduler;
pub mod service;
pub mod subject;

pub use allocation::{
    plan_allocation, split_exact, Allocation, AllocationBasis, AllocationLine, AllocationPlan,
    WeightedSubject,
};
pub use bill::{Bill, BillStatus, BillType, BillUpdate, DeleteMode, NewBill};
pub use consumption::{resolve_quantity, totals_by_subject, Consumption, NewConsumption};
pub use error::BillingError;
pub use payment::{
    subject_statuses, NewPayment, Payment, PaymentState, PaymentStatus, SubjectPaymentStatus,
};
pub use ports::{BillFilter, BillingStore, BillingTx};
pub use recurring::{next_due_date, Frequency, NewTemplate, RecurringTemplate};
pub use scheduler::pending_occurrences;
pub use service::{BillingService, PostedBill, ReopenRequest};
pub use subject::{subject_for_payer, Participant, Subject, SubjectKind, MAX_WEIGHT, WEIGHT_SCALE};
