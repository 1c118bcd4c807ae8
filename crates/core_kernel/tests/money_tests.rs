//! Unit tests for the Money and Quantity types
//!
//! Tests cover canonical precision, banker's rounding at the midpoint,
//! arithmetic, ratios, and ordering.

use core_kernel::{round_half_even, Money, MoneyError, Quantity};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_keeps_two_decimal_places() {
        let m = Money::new(dec!(100.50));
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_new_rounds_half_to_even() {
        assert_eq!(Money::new(dec!(0.125)).amount(), dec!(0.12));
        assert_eq!(Money::new(dec!(0.135)).amount(), dec!(0.14));
    }

    #[test]
    fn test_from_minor_converts_cents() {
        assert_eq!(Money::from_minor(10050).amount(), dec!(100.50));
        assert_eq!(Money::from_minor(-1).amount(), dec!(-0.01));
    }

    #[test]
    fn test_zero() {
        assert!(Money::zero().is_zero());
        assert_eq!(Money::default(), Money::zero());
    }

    #[test]
    fn test_quantity_keeps_three_decimal_places() {
        assert_eq!(Quantity::new(dec!(1.2345)).value(), dec!(1.234));
        assert_eq!(Quantity::new(dec!(1.2355)).value(), dec!(1.236));
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_midpoint_rounds_to_even_digit() {
        assert_eq!(round_half_even(dec!(2.345), 2), dec!(2.34));
        assert_eq!(round_half_even(dec!(2.355), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(2.325), 2), dec!(2.32));
        assert_eq!(round_half_even(dec!(2.335), 2), dec!(2.34));
    }

    #[test]
    fn test_midpoint_is_not_half_up() {
        // Half-up would give 0.13 here
        assert_eq!(round_half_even(dec!(0.125), 2), dec!(0.12));
    }

    #[test]
    fn test_non_midpoint_rounds_to_nearest() {
        assert_eq!(round_half_even(dec!(2.3450001), 2), dec!(2.35));
        assert_eq!(round_half_even(dec!(2.3449999), 2), dec!(2.34));
    }

    #[test]
    fn test_negative_midpoint() {
        assert_eq!(round_half_even(dec!(-2.345), 2), dec!(-2.34));
        assert_eq!(round_half_even(dec!(-2.355), 2), dec!(-2.36));
    }

    #[test]
    fn test_unit_precision_midpoint() {
        assert_eq!(round_half_even(dec!(10.0005), 3), dec!(10.000));
        assert_eq!(round_half_even(dec!(10.0015), 3), dec!(10.002));
    }
}

mod predicates {
    use super::*;

    #[test]
    fn test_sign_predicates() {
        assert!(Money::new(dec!(0.01)).is_positive());
        assert!(!Money::zero().is_positive());
        assert!(Money::new(dec!(-0.01)).is_negative());
        assert!(!Money::zero().is_negative());
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_add_and_sub() {
        let a = Money::new(dec!(100.00));
        let b = Money::new(dec!(30.25));
        assert_eq!(a.checked_add(&b).unwrap().amount(), dec!(130.25));
        assert_eq!(b.checked_sub(&a).unwrap().amount(), dec!(-69.75));
    }

    #[test]
    fn test_checked_add_overflow() {
        let huge = Money::new(Decimal::MAX);
        assert_eq!(huge.checked_add(&huge), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_operators() {
        let a = Money::new(dec!(10.00));
        let b = Money::new(dec!(3.33));
        assert_eq!((a - b).amount(), dec!(6.67));
        assert_eq!((a + b).amount(), dec!(13.33));
        assert_eq!((-b).amount(), dec!(-3.33));
    }

    #[test]
    fn test_sum() {
        let parts = vec![
            Money::new(dec!(3.34)),
            Money::new(dec!(3.33)),
            Money::new(dec!(3.33)),
        ];
        let total: Money = parts.iter().sum();
        assert_eq!(total, Money::new(dec!(10.00)));
    }

    #[test]
    fn test_multiply_by_ratio_rounds() {
        let total = Money::new(dec!(100.00));
        assert_eq!(
            total.multiply_by_ratio(dec!(2), dec!(3)).unwrap().amount(),
            dec!(66.67)
        );
    }

    #[test]
    fn test_ratio_rejects_zero_denominator() {
        assert_eq!(
            Money::new(dec!(1.00)).multiply_by_ratio(dec!(1), dec!(0)),
            Err(MoneyError::DivisionByZero)
        );
    }

    #[test]
    fn test_min_and_ordering() {
        let small = Money::new(dec!(30.00));
        let large = Money::new(dec!(50.00));
        assert!(small < large);
        assert_eq!(large.min(small), small);
    }
}

mod serde_format {
    use super::*;

    #[test]
    fn test_money_serializes_as_decimal() {
        let json = serde_json::to_string(&Money::new(dec!(12.50))).unwrap();
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::new(dec!(12.50)));
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let m: Money = serde_json::from_str("\"2.345\"").unwrap();
        assert_eq!(m.amount(), dec!(2.34));
    }
}
