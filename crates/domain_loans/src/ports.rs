//! Loan storage ports
//!
//! Balances are never stored. Adapters return loans paired with the sum of
//! their payment rows and the domain derives everything else.

use async_trait::async_trait;

use core_kernel::{LoanId, Money, StoreError, Transactional, UnitOfWork, UserId};

use crate::balance::LoanWithBalance;
use crate::loan::{Loan, LoanPayment, LoanStatus};

/// Filter criteria for listing loans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoanFilter {
    /// Loans where this user is lender or borrower
    pub user: Option<UserId>,
    pub status: Option<LoanStatus>,
}

impl LoanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn involving(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_status(mut self, status: LoanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.user
            .map_or(true, |u| loan.lender_id == u || loan.borrower_id == u)
            && self.status.map_or(true, |s| loan.status == s)
    }
}

/// Read side of loan storage
#[async_trait]
pub trait LoanStore: Transactional {
    async fn find_loan(&self, id: LoanId) -> Result<Option<LoanWithBalance>, StoreError>;

    /// Loans matching `filter`, oldest first
    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanWithBalance>, StoreError>;

    async fn list_loan_payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>, StoreError>;

    /// Open loans between two users in either direction
    async fn open_loans_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Vec<LoanWithBalance>, StoreError>;

    /// Every open loan
    async fn open_loans(&self) -> Result<Vec<LoanWithBalance>, StoreError>;
}

/// Write side of loan storage, scoped to one unit of work
#[async_trait]
pub trait LoanTx: UnitOfWork {
    /// Loads a loan and holds it against concurrent writers until commit
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError>;

    /// Locks the open loans from `lender` to `borrower`, oldest first
    async fn lock_open_loans(
        &mut self,
        lender: UserId,
        borrower: UserId,
    ) -> Result<Vec<Loan>, StoreError>;

    /// Locks every open loan in id order
    async fn lock_all_open_loans(&mut self) -> Result<Vec<Loan>, StoreError>;

    /// Sum of the loan's payment rows as seen by this unit of work
    async fn paid_total(&mut self, loan_id: LoanId) -> Result<Money, StoreError>;

    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError>;

    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError>;

    /// Removes a loan and its payments
    async fn delete_loan(&mut self, id: LoanId) -> Result<(), StoreError>;

    async fn insert_loan_payment(&mut self, payment: &LoanPayment) -> Result<(), StoreError>;
}
