//! Payments against bills and the derived payment status
//!
//! Status is always computed from the payment rows on read; nothing here is
//! stored on the bill.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{BillId, Money, PaymentId, UserId};

use crate::allocation::Allocation;
use crate::bill::Bill;
use crate::error::BillingError;
use crate::subject::{subject_for_payer, Participant, Subject};

/// A payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub bill_id: BillId,
    pub payer_id: UserId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Input for recording a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub bill_id: BillId,
    pub payer_id: UserId,
    pub amount: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl NewPayment {
    pub fn new(bill_id: BillId, payer_id: UserId, amount: Money) -> Self {
        Self {
            bill_id,
            payer_id,
            amount,
            paid_at: None,
            note: None,
        }
    }

    pub fn paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl Payment {
    /// Validates and builds a payment; overpayment is allowed
    pub fn record(new: NewPayment) -> Result<Self, BillingError> {
        if !new.amount.is_positive() {
            return Err(BillingError::validation(format!(
                "payment amount must be greater than zero, got {}",
                new.amount
            )));
        }
        Ok(Self {
            id: PaymentId::new_v7(),
            bill_id: new.bill_id,
            payer_id: new.payer_id,
            amount: new.amount,
            paid_at: new.paid_at.unwrap_or_else(Utc::now),
            note: new.note,
        })
    }
}

/// Whether a bill has been fully paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Underpaid,
    Paid,
    Overpaid,
}

impl PaymentState {
    fn from_remaining(remaining: Money) -> Self {
        if remaining.is_positive() {
            PaymentState::Underpaid
        } else if remaining.is_negative() {
            PaymentState::Overpaid
        } else {
            PaymentState::Paid
        }
    }
}

/// Bill-level payment summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub bill_id: BillId,
    pub total_paid: Money,
    pub total_due: Money,
    /// Negative when the bill is overpaid
    pub remaining: Money,
    pub status: PaymentState,
}

impl PaymentStatus {
    pub fn derive(bill: &Bill, payments: &[Payment]) -> Self {
        let total_paid: Money = payments
            .iter()
            .filter(|p| p.bill_id == bill.id)
            .map(|p| p.amount)
            .sum();
        let remaining = bill.total_amount - total_paid;
        Self {
            bill_id: bill.id,
            total_paid,
            total_due: bill.total_amount,
            remaining,
            status: PaymentState::from_remaining(remaining),
        }
    }
}

/// How much of one subject's share has been paid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectPaymentStatus {
    pub subject: Subject,
    pub allocated: Money,
    pub paid: Money,
    pub remaining: Money,
    pub status: PaymentState,
}

/// Breaks payments down by allocation subject.
///
/// Payments by members of a group participant count toward the group.
/// Subjects that paid without holding an allocation are listed with a zero
/// share so that no payment disappears from the breakdown.
pub fn subject_statuses(
    allocations: &[Allocation],
    payments: &[Payment],
    participants: &[Participant],
) -> Vec<SubjectPaymentStatus> {
    let mut paid: HashMap<Subject, Money> = HashMap::new();
    for payment in payments {
        let subject = subject_for_payer(participants, payment.payer_id);
        let entry = paid.entry(subject).or_default();
        *entry = *entry + payment.amount;
    }

    let mut statuses: Vec<SubjectPaymentStatus> = allocations
        .iter()
        .map(|allocation| {
            let paid = paid.remove(&allocation.subject).unwrap_or_default();
            let remaining = allocation.allocated_amount - paid;
            SubjectPaymentStatus {
                subject: allocation.subject,
                allocated: allocation.allocated_amount,
                paid,
                remaining,
                status: PaymentState::from_remaining(remaining),
            }
        })
        .collect();

    statuses.extend(paid.into_iter().map(|(subject, paid)| SubjectPaymentStatus {
        subject,
        allocated: Money::zero(),
        paid,
        remaining: -paid,
        status: PaymentState::Overpaid,
    }));
    statuses.sort_by(|a, b| a.subject.cmp(&b.subject));
    statuses
}
