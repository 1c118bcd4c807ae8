//! Group compensation
//!
//! When a group member owes someone outside the group, and that outsider in
//! turn owes another member of the same group, the two debts cancel as far
//! as the group is concerned. The chain is netted by recording an equal
//! compensation payment on both loans; no loan between the two members is
//! created.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use core_kernel::{GroupId, LoanId, Money, UserId};

use crate::balance::LoanWithBalance;

/// Which group, if any, each user belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembership {
    groups: BTreeMap<UserId, GroupId>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group and its members.
    ///
    /// A user already placed in another group keeps that first group.
    pub fn with_group(mut self, group: GroupId, members: impl IntoIterator<Item = UserId>) -> Self {
        for member in members {
            self.groups.entry(member).or_insert(group);
        }
        self
    }

    pub fn group_of(&self, user: UserId) -> Option<GroupId> {
        self.groups.get(&user).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One netting step across a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOffset {
    /// The outsider lent to a group member
    pub inbound: LoanId,
    /// Another member of that group lent to the outsider
    pub outbound: LoanId,
    pub amount: Money,
}

/// Plans every group compensation available over `loans`.
///
/// Loans are visited oldest first (ids are time ordered). For each loan
/// from an outsider to a group member, loans from members of the same group
/// back to that outsider are consumed oldest first until the inbound loan
/// is used up. Settled loans and loans with nothing outstanding are skipped.
pub fn plan_group_compensation(loans: &[LoanWithBalance], groups: &GroupMembership) -> Vec<ChainOffset> {
    let mut open: Vec<(&LoanWithBalance, Money)> = loans
        .iter()
        .filter(|l| l.loan.is_open() && l.outstanding.is_positive())
        .map(|l| (l, l.outstanding))
        .collect();
    open.sort_by_key(|(l, _)| l.loan.id);

    let mut offsets = Vec::new();
    for i in 0..open.len() {
        let inbound = open[i].0;
        let outsider = inbound.loan.lender_id;
        let Some(group) = groups.group_of(inbound.loan.borrower_id) else {
            continue;
        };
        if groups.group_of(outsider) == Some(group) {
            continue;
        }

        for j in 0..open.len() {
            if open[i].1.is_zero() {
                break;
            }
            if i == j || open[j].1.is_zero() {
                continue;
            }
            let outbound = open[j].0;
            if outbound.loan.borrower_id != outsider
                || groups.group_of(outbound.loan.lender_id) != Some(group)
            {
                continue;
            }

            let amount = open[i].1.min(open[j].1);
            open[i].1 = open[i].1 - amount;
            open[j].1 = open[j].1 - amount;
            offsets.push(ChainOffset {
                inbound: inbound.loan.id,
                outbound: outbound.loan.id,
                amount,
            });
        }
    }
    offsets
}
