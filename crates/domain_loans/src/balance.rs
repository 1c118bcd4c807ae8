//! Pairwise balances and the settle-up summary
//!
//! Everything here is a single pass over the open loans handed in, so the
//! cost follows the number of loans rather than the number of user pairs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use core_kernel::{Money, UserId};

use crate::loan::{Loan, LoanPayment};

/// A loan with its repayment figures derived from the payment rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanWithBalance {
    pub loan: Loan,
    pub paid: Money,
    pub outstanding: Money,
}

impl LoanWithBalance {
    pub fn new(loan: Loan, paid: Money) -> Self {
        let outstanding = loan.outstanding(paid);
        Self {
            loan,
            paid,
            outstanding,
        }
    }

    /// Builds the balance from the loan's payment rows
    pub fn from_payments(loan: Loan, payments: &[LoanPayment]) -> Self {
        let paid = payments
            .iter()
            .filter(|p| p.loan_id == loan.id)
            .map(|p| p.amount)
            .sum();
        Self::new(loan, paid)
    }
}

/// Net amount `user_a` owes `user_b` over the given loans.
///
/// Negative when `user_b` owes `user_a`. Settled loans and loans between
/// other users are ignored.
pub fn pair_balance(user_a: UserId, user_b: UserId, loans: &[LoanWithBalance]) -> Money {
    loans
        .iter()
        .filter(|l| l.loan.is_open() && l.loan.is_between(user_a, user_b))
        .map(|l| {
            if l.loan.borrower_id == user_a {
                l.outstanding
            } else {
                -l.outstanding
            }
        })
        .sum()
}

/// A normalised debt between two users; `amount` is always positive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairBalance {
    pub debtor: UserId,
    pub creditor: UserId,
    pub amount: Money,
}

/// One user's totals across every pair they appear in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPosition {
    pub user: UserId,
    /// What this user owes others
    pub owes: Money,
    /// What others owe this user
    pub owed: Money,
    /// `owed − owes`
    pub net: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleUp {
    pub balances: Vec<PairBalance>,
    pub positions: Vec<UserPosition>,
}

impl SettleUp {
    /// The pair balance for two users, whichever way round it runs
    pub fn between(&self, a: UserId, b: UserId) -> Option<&PairBalance> {
        self.balances.iter().find(|p| {
            (p.debtor == a && p.creditor == b) || (p.debtor == b && p.creditor == a)
        })
    }

    pub fn position(&self, user: UserId) -> Option<&UserPosition> {
        self.positions.iter().find(|p| p.user == user)
    }
}

/// Nets every pair with at least one open loan.
///
/// Pairs whose loans cancel out exactly are left out. Output is ordered by
/// user id so repeated runs give identical summaries.
pub fn settle_up(loans: &[LoanWithBalance]) -> SettleUp {
    // keyed by (low, high); positive means low owes high
    let mut pairs: BTreeMap<(UserId, UserId), Money> = BTreeMap::new();
    for entry in loans.iter().filter(|l| l.loan.is_open()) {
        let borrower = entry.loan.borrower_id;
        let lender = entry.loan.lender_id;
        let (key, signed) = if borrower < lender {
            ((borrower, lender), entry.outstanding)
        } else {
            ((lender, borrower), -entry.outstanding)
        };
        let net = pairs.entry(key).or_default();
        *net = *net + signed;
    }

    let balances: Vec<PairBalance> = pairs
        .into_iter()
        .filter(|(_, net)| !net.is_zero())
        .map(|((low, high), net)| {
            if net.is_positive() {
                PairBalance {
                    debtor: low,
                    creditor: high,
                    amount: net,
                }
            } else {
                PairBalance {
                    debtor: high,
                    creditor: low,
                    amount: -net,
                }
            }
        })
        .collect();

    let mut totals: BTreeMap<UserId, (Money, Money)> = BTreeMap::new();
    for pair in &balances {
        let debtor = totals.entry(pair.debtor).or_default();
        debtor.0 = debtor.0 + pair.amount;
        let creditor = totals.entry(pair.creditor).or_default();
        creditor.1 = creditor.1 + pair.amount;
    }

    let positions = totals
        .into_iter()
        .map(|(user, (owes, owed))| UserPosition {
            user,
            owes,
            owed,
            net: owed - owes,
        })
        .collect();

    SettleUp {
        balances,
        positions,
    }
}
