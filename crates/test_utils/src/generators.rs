//! Property-Based Test Generators
//!
//! Proptest strategies producing values that already satisfy the domain's
//! input rules.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use core_kernel::{GroupId, Money, Quantity, UserId};
use domain_billing::{Subject, WeightedSubject};

/// Amounts from 0.01 to 1,000,000.00
pub fn positive_money_strategy() -> impl Strategy<Value = Money> {
    (1i64..100_000_000i64).prop_map(Money::from_minor)
}

/// Amounts from 0.00, including the zero total a bill may carry
pub fn non_negative_money_strategy() -> impl Strategy<Value = Money> {
    (0i64..100_000_000i64).prop_map(Money::from_minor)
}

/// Positive unit quantities with up to three decimals
pub fn quantity_strategy() -> impl Strategy<Value = Quantity> {
    (1i64..10_000_000i64).prop_map(|n| Quantity::new(Decimal::new(n, 3)))
}

/// Positive weights with up to two decimals
pub fn weight_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// A user or group subject drawn from a small id space, so duplicates occur
pub fn subject_strategy() -> impl Strategy<Value = Subject> {
    (any::<bool>(), 1u128..64).prop_map(|(group, n)| {
        let id = Uuid::from_u128(n);
        if group {
            Subject::Group(GroupId::from_uuid(id))
        } else {
            Subject::User(UserId::from_uuid(id))
        }
    })
}

/// One to twelve distinct subjects with positive weights
pub fn weighted_subjects_strategy() -> impl Strategy<Value = Vec<WeightedSubject>> {
    prop::collection::btree_map(subject_strategy(), weight_strategy(), 1..12).prop_map(|subjects| {
        subjects
            .into_iter()
            .map(|(subject, weight)| WeightedSubject { subject, weight })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_weights_positive(subjects in weighted_subjects_strategy()) {
            prop_assert!(!subjects.is_empty());
            prop_assert!(subjects.iter().all(|s| s.weight > Decimal::ZERO));
        }

        #[test]
        fn prop_positive_money(m in positive_money_strategy()) {
            prop_assert!(m.is_positive());
        }
    }
}
