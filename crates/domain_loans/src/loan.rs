//! Loans between users and the payments against them
//!
//! A loan's outstanding amount is always `principal − Σ payments`. Nothing
//! else is stored about how much has been repaid; compensation is recorded
//! as ordinary payment rows of kind [`LoanPaymentKind::Compensation`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{LoanId, LoanPaymentId, Money, UserId};

use crate::error::LoanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Open,
    Settled,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Open => "open",
            LoanStatus::Settled => "settled",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(LoanStatus::Open),
            "settled" => Ok(LoanStatus::Settled),
            other => Err(LoanError::validation(format!("unknown loan status '{}'", other))),
        }
    }
}

/// Why a loan payment row exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanPaymentKind {
    /// Money actually handed back
    Repayment,
    /// Offset against an opposing loan
    Compensation,
}

impl LoanPaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanPaymentKind::Repayment => "repayment",
            LoanPaymentKind::Compensation => "compensation",
        }
    }
}

impl FromStr for LoanPaymentKind {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repayment" => Ok(LoanPaymentKind::Repayment),
            "compensation" => Ok(LoanPaymentKind::Compensation),
            other => Err(LoanError::validation(format!("unknown loan payment kind '{}'", other))),
        }
    }
}

/// Input for creating a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    pub lender_id: UserId,
    pub borrower_id: UserId,
    pub principal: Money,
    pub note: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl NewLoan {
    pub fn new(lender_id: UserId, borrower_id: UserId, principal: Money) -> Self {
        Self {
            lender_id,
            borrower_id,
            principal,
            note: None,
            due_date: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn due(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub lender_id: UserId,
    pub borrower_id: UserId,
    pub principal: Money,
    pub status: LoanStatus,
    pub note: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn create(new: NewLoan) -> Result<Self, LoanError> {
        if new.lender_id == new.borrower_id {
            return Err(LoanError::validation("lender and borrower must be different users"));
        }
        if !new.principal.is_positive() {
            return Err(LoanError::validation(format!(
                "loan principal must be greater than zero, got {}",
                new.principal
            )));
        }

        Ok(Self {
            id: LoanId::new_v7(),
            lender_id: new.lender_id,
            borrower_id: new.borrower_id,
            principal: new.principal,
            status: LoanStatus::Open,
            note: new.note,
            due_date: new.due_date,
            created_at: Utc::now(),
            settled_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == LoanStatus::Open
    }

    /// Returns true if the loan is between `a` and `b`, in either direction
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.lender_id == a && self.borrower_id == b) || (self.lender_id == b && self.borrower_id == a)
    }

    /// Returns true if `other` runs between the same users in the opposite direction
    pub fn is_reverse_of(&self, other: &Loan) -> bool {
        self.lender_id == other.borrower_id && self.borrower_id == other.lender_id
    }

    pub fn outstanding(&self, paid: Money) -> Money {
        self.principal - paid
    }

    /// Checks a payment of `amount` against the loan, given `paid` so far.
    ///
    /// Returns the outstanding amount after the payment and settles the loan
    /// when it reaches zero. Nothing is changed when the payment is rejected.
    pub fn apply_payment(&mut self, paid: Money, amount: Money) -> Result<Money, LoanError> {
        if !self.is_open() {
            return Err(LoanError::invalid_transition(self.id, self.status, "pay"));
        }
        if !amount.is_positive() {
            return Err(LoanError::validation(format!(
                "loan payment must be greater than zero, got {}",
                amount
            )));
        }

        let outstanding = self.outstanding(paid);
        if amount > outstanding {
            return Err(LoanError::LoanOverpayment {
                loan_id: self.id,
                requested: amount,
                outstanding,
            });
        }

        let remaining = outstanding - amount;
        if remaining.is_zero() {
            self.status = LoanStatus::Settled;
            self.settled_at = Some(Utc::now());
        }
        Ok(remaining)
    }
}

/// Input for recording a repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoanPayment {
    pub loan_id: LoanId,
    pub amount: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl NewLoanPayment {
    pub fn new(loan_id: LoanId, amount: Money) -> Self {
        Self {
            loan_id,
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: LoanPaymentId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub kind: LoanPaymentKind,
    pub paid_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl LoanPayment {
    pub fn repayment(new: NewLoanPayment) -> Self {
        Self {
            id: LoanPaymentId::new_v7(),
            loan_id: new.loan_id,
            amount: new.amount,
            kind: LoanPaymentKind::Repayment,
            paid_at: new.paid_at.unwrap_or_else(Utc::now),
            note: new.note,
        }
    }

    pub fn compensation(loan_id: LoanId, amount: Money, against: LoanId) -> Self {
        Self {
            id: LoanPaymentId::new_v7(),
            loan_id,
            amount,
            kind: LoanPaymentKind::Compensation,
            paid_at: Utc::now(),
            note: Some(format!("offset against {}", against)),
        }
    }
}

/// Works out how much two opposing open loans can be netted by.
///
/// The offset is the smaller of the two outstanding amounts; applying it to
/// both loans settles at least one of them.
pub fn compensation_offset(
    a: &Loan,
    a_outstanding: Money,
    b: &Loan,
    b_outstanding: Money,
) -> Result<Money, LoanError> {
    if a.id == b.id {
        return Err(LoanError::validation("a loan cannot be compensated against itself"));
    }
    if !a.is_reverse_of(b) {
        return Err(LoanError::validation(format!(
            "loans {} and {} are not between the same users in opposite directions",
            a.id, b.id
        )));
    }
    for loan in [a, b] {
        if !loan.is_open() {
            return Err(LoanError::invalid_transition(loan.id, loan.status, "compensate"));
        }
    }
    Ok(a_outstanding.min(b_outstanding))
}
