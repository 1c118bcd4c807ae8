//! Loan Domain - Peer Loans and Settle-Up
//!
//! Users lend each other money outside of shared bills. A loan stays open
//! until its payments reach the principal. Two loans running in opposite
//! directions between the same users can be compensated, which records an
//! equal payment on each and settles the smaller one. Chains where a group
//! member owes an outsider who owes another member of the same group are
//! netted the same way.
//!
//! Balances are derived from payment rows on every read; nothing here keeps
//! a running total that could drift from the rows it summarises.

pub mod balance;
pub mod error;
pub mod group;
pub mod loan;
pub mod ports;
pub mod service;

pub use balance::{pair_balance, settle_up, LoanWithBalance, PairBalance, SettleUp, UserPosition};
pub use error::LoanError;
pub use group::{plan_group_compensation, ChainOffset, GroupMembership};
pub use loan::{
    compensation_offset, Loan, LoanPayment, LoanPaymentKind, LoanStatus, NewLoan, NewLoanPayment,
};
pub use ports::{LoanFilter, LoanStore, LoanTx};
pub use service::{Compensation, CreatedLoan, GroupCompensation, LoanService, RecordedLoanPayment};
