//! Allocation engine
//!
//! Splits a bill's total among its subjects so the shares add up to the
//! total exactly, to the cent.
//!
//! # Algorithm
//!
//! 1. Weight each subject: summed valid consumption when the bill has any,
//!    otherwise the participant weight (1 for a plain equal split).
//! 2. Compute the unrounded share `total × weight / Σ weights`.
//! 3. Round every share half-to-even to currency precision.
//! 4. Let `remainder = total − Σ rounded`. It is a whole number of cents
//!    no larger in magnitude than half a cent per subject.
//! 5. Hand out the remainder one cent at a time. A positive remainder goes
//!    first to the subjects whose share was rounded down the most
//!    (largest `raw − rounded`); a negative remainder is taken first from
//!    those rounded up the most (smallest `raw − rounded`). Equal errors
//!    fall back to subject order: UUID ascending, then users before groups.
//!
//! With 10.00 split three ways every share rounds to 3.33, one cent is
//! left over, all three errors tie, and the subject with the lowest UUID
//! receives 3.34.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use core_kernel::{AllocationId, BillId, Money, MoneyError};

use crate::bill::Bill;
use crate::consumption::{totals_by_subject, Consumption};
use crate::error::BillingError;
use crate::subject::{Participant, Subject};

/// What the shares of an allocation were weighted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBasis {
    /// Recorded consumption quantities
    Consumption,
    /// Participant weights; an equal split when every weight is 1
    Participants,
}

impl AllocationBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationBasis::Consumption => "consumption",
            AllocationBasis::Participants => "participants",
        }
    }
}

impl std::str::FromStr for AllocationBasis {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumption" => Ok(AllocationBasis::Consumption),
            "participants" => Ok(AllocationBasis::Participants),
            other => Err(BillingError::validation(format!("unknown allocation basis '{}'", other))),
        }
    }
}

/// A persisted share of a posted bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub bill_id: BillId,
    pub subject: Subject,
    pub allocated_amount: Money,
    pub basis: AllocationBasis,
    pub weight: Decimal,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedSubject {
    pub subject: Subject,
    pub weight: Decimal,
}

/// One subject's computed share before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub subject: Subject,
    pub weight: Decimal,
    /// Exact share before rounding
    pub raw_share: Decimal,
    pub amount: Money,
}

impl AllocationLine {
    /// How far rounding moved the share; positive when rounded down
    pub fn rounding_error(&self) -> Decimal {
        self.raw_share - self.amount.amount()
    }
}

/// The full split of one bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub bill_id: BillId,
    pub basis: AllocationBasis,
    pub lines: Vec<AllocationLine>,
}

impl AllocationPlan {
    pub fn total(&self) -> Money {
        self.lines.iter().map(|line| line.amount).sum()
    }

    pub fn into_allocations(self, computed_at: DateTime<Utc>) -> Vec<Allocation> {
        let bill_id = self.bill_id;
        let basis = self.basis;
        self.lines
            .into_iter()
            .map(|line| Allocation {
                id: AllocationId::new_v7(),
                bill_id,
                subject: line.subject,
                allocated_amount: line.amount,
                basis,
                weight: line.weight,
                computed_at,
            })
            .collect()
    }
}

/// Splits `total` across `subjects` in proportion to their weights.
///
/// Duplicate subjects are merged. The returned lines are in subject order
/// and their amounts sum to `total` exactly.
pub fn split_exact(total: Money, subjects: &[WeightedSubject]) -> Result<Vec<AllocationLine>, MoneyError> {
    let mut merged: BTreeMap<Subject, Decimal> = BTreeMap::new();
    for entry in subjects {
        if entry.weight < Decimal::ZERO {
            return Err(MoneyError::InvalidAmount(format!(
                "negative weight {} for {}",
                entry.weight, entry.subject
            )));
        }
        *merged.entry(entry.subject).or_insert(Decimal::ZERO) += entry.weight;
    }

    let weight_sum: Decimal = merged.values().sum();
    if merged.is_empty() || weight_sum.is_zero() {
        return Err(MoneyError::InvalidAmount("no weighted subjects to allocate to".to_string()));
    }

    let mut lines = merged
        .into_iter()
        .map(|(subject, weight)| {
            let raw_share = total.ratio(weight, weight_sum)?;
            Ok(AllocationLine {
                subject,
                weight,
                raw_share,
                amount: Money::new(raw_share),
            })
        })
        .collect::<Result<Vec<_>, MoneyError>>()?;

    let allocated: Money = lines.iter().map(|line| line.amount).sum();
    let remainder_cents = total.checked_sub(&allocated)?.minor_units();
    if remainder_cents != 0 {
        distribute_remainder(&mut lines, remainder_cents);
    }

    Ok(lines)
}

fn distribute_remainder(lines: &mut [AllocationLine], remainder_cents: i64) {
    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (lines[a].rounding_error(), lines[b].rounding_error());
        let by_error = if remainder_cents > 0 { eb.cmp(&ea) } else { ea.cmp(&eb) };
        by_error.then_with(|| lines[a].subject.cmp(&lines[b].subject))
    });

    let step = Money::from_minor(remainder_cents.signum());
    for &index in order.iter().cycle().take(remainder_cents.unsigned_abs() as usize) {
        lines[index].amount = lines[index].amount + step;
    }
}

/// Chooses the weighting for `bill` and splits its total.
///
/// Valid consumptions win when their quantities add up to more than zero;
/// otherwise active participants are used. Fails with
/// [`BillingError::NoAllocationSubjects`] when neither yields a subject.
pub fn plan_allocation(
    bill: &Bill,
    consumptions: &[Consumption],
    participants: &[Participant],
) -> Result<AllocationPlan, BillingError> {
    let usage = totals_by_subject(consumptions);
    let usage_total: Decimal = usage.values().map(|q| q.value()).sum();

    let (basis, weights): (AllocationBasis, Vec<WeightedSubject>) = if usage_total > Decimal::ZERO {
        let weights = usage
            .into_iter()
            .map(|(subject, quantity)| WeightedSubject {
                subject,
                weight: quantity.value(),
            })
            .collect();
        (AllocationBasis::Consumption, weights)
    } else {
        let weights = participants
            .iter()
            .filter(|p| p.active && p.weight > Decimal::ZERO)
            .map(|p| WeightedSubject {
                subject: p.subject,
                weight: p.weight,
            })
            .collect();
        (AllocationBasis::Participants, weights)
    };

    if weights.is_empty() {
        return Err(BillingError::NoAllocationSubjects(bill.id));
    }

    let lines = split_exact(bill.total_amount, &weights)?;
    Ok(AllocationPlan {
        bill_id: bill.id,
        basis,
        lines,
    })
}
