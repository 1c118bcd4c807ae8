//! Money and quantity types with exact decimal arithmetic
//!
//! Every stored figure passes through [`round_half_even`] before it is
//! persisted or compared. Currency amounts keep two decimal places and
//! physical quantities (kWh, m³) keep three. Intermediate values such as
//! raw allocation shares may carry more precision and are only rounded
//! when they become a [`Money`].

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

/// Decimal places kept for currency amounts
pub const CURRENCY_PRECISION: u32 = 2;

/// Decimal places kept for metered quantities
pub const QUANTITY_PRECISION: u32 = 3;

/// Rounds `value` to `dp` decimal places using round-half-to-even.
///
/// A value exactly halfway between two candidates goes to the one whose last
/// digit is even, so `2.345` becomes `2.34` while `2.355` becomes `2.36`.
/// Anything not on the midpoint rounds to the nearest candidate.
pub fn round_half_even(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

/// Errors that can occur during money operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Overflow during calculation")]
    Overflow,
}

/// A currency amount canonicalized to two decimal places
///
/// The ledger is single-currency, so the amount is the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money {
    amount: Decimal,
}

impl Money {
    /// Creates a Money value, rounding half-to-even to currency precision
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount: round_half_even(amount, CURRENCY_PRECISION),
        }
    }

    /// Creates Money from an integer amount in minor units (cents)
    pub fn from_minor(minor_units: i64) -> Self {
        Self::new(Decimal::new(minor_units, CURRENCY_PRECISION))
    }

    pub fn zero() -> Self {
        Self {
            amount: Decimal::ZERO,
        }
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the amount as a whole number of cents
    pub fn minor_units(&self) -> i64 {
        let mut cents = self.amount;
        cents.rescale(CURRENCY_PRECISION);
        cents.mantissa() as i64
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Returns true if the amount is strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
        }
    }

    /// Checked addition that reports overflow instead of panicking
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_add(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction that reports overflow instead of panicking
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_sub(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Returns `self × numerator / denominator` without rounding.
    ///
    /// Used where the unrounded share matters, e.g. to measure how far a
    /// rounded allocation drifted from its exact value.
    pub fn ratio(&self, numerator: Decimal, denominator: Decimal) -> Result<Decimal, MoneyError> {
        if denominator.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.amount
            .checked_mul(numerator)
            .and_then(|scaled| scaled.checked_div(denominator))
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by `numerator / denominator` and rounds to currency precision
    pub fn multiply_by_ratio(
        &self,
        numerator: Decimal,
        denominator: Decimal,
    ) -> Result<Money, MoneyError> {
        self.ratio(numerator, denominator).map(Self::new)
    }

    /// Returns the smaller of two amounts
    pub fn min(self, other: Money) -> Money {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.amount
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.amount.cmp(&other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.amount)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.amount + other.amount)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.amount - other.amount)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            amount: -self.amount,
        }
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// A metered quantity (kWh, m³, ...) canonicalized to three decimal places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Quantity {
    value: Decimal,
}

impl Quantity {
    pub fn new(value: Decimal) -> Self {
        Self {
            value: round_half_even(value, QUANTITY_PRECISION),
        }
    }

    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    /// Difference between two readings, `self - earlier`
    pub fn since(&self, earlier: Quantity) -> Quantity {
        Quantity::new(self.value - earlier.value)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(quantity: Quantity) -> Self {
        quantity.value
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Add for Quantity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.value + other.value)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_even_midpoints() {
        assert_eq!(round_half_even(dec!(2.345), 2), dec!(2.34));
        assert_eq!(round_half_even(dec!(2.355), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(2.365), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(-2.345), 2), dec!(-2.34));
    }

    #[test]
    fn test_round_half_even_off_midpoint() {
        assert_eq!(round_half_even(dec!(2.3451), 2), dec!(2.35));
        assert_eq!(round_half_even(dec!(2.3449), 2), dec!(2.34));
        assert_eq!(round_half_even(dec!(1.0005), 3), dec!(1.000));
        assert_eq!(round_half_even(dec!(1.0015), 3), dec!(1.002));
    }

    #[test]
    fn test_money_canonicalizes_on_construction() {
        assert_eq!(Money::new(dec!(10.005)).amount(), dec!(10.00));
        assert_eq!(Money::new(dec!(10.015)).amount(), dec!(10.02));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::new(dec!(10.00)).minor_units(), 1000);
        assert_eq!(Money::new(dec!(0.07)).minor_units(), 7);
        assert_eq!(Money::new(dec!(-3.33)).minor_units(), -333);
        assert_eq!(Money::from_minor(1234).amount(), dec!(12.34));
    }

    #[test]
    fn test_ratio_keeps_precision() {
        let total = Money::new(dec!(10.00));
        let raw = total.ratio(dec!(1), dec!(3)).unwrap();
        assert!(raw > dec!(3.333) && raw < dec!(3.334));
        assert_eq!(total.multiply_by_ratio(dec!(1), dec!(3)).unwrap().amount(), dec!(3.33));
    }

    #[test]
    fn test_ratio_zero_denominator() {
        let total = Money::new(dec!(10.00));
        assert_eq!(total.ratio(dec!(1), Decimal::ZERO), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_quantity_precision() {
        assert_eq!(Quantity::new(dec!(12.3455)).value(), dec!(12.346));
        assert_eq!(Quantity::new(dec!(150.5)).since(Quantity::new(dec!(100.25))).value(), dec!(50.25));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::new(dec!(3.3)).to_string(), "3.30");
        assert_eq!(Quantity::new(dec!(1.5)).to_string(), "1.500");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn rounding_is_idempotent(mantissa in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..6u32) {
            let value = Decimal::new(mantissa, scale);
            let once = round_half_even(value, CURRENCY_PRECISION);
            prop_assert_eq!(round_half_even(once, CURRENCY_PRECISION), once);
        }

        #[test]
        fn rounding_error_is_at_most_half_a_cent(mantissa in -1_000_000_000i64..1_000_000_000i64) {
            let value = Decimal::new(mantissa, 5);
            let rounded = round_half_even(value, CURRENCY_PRECISION);
            prop_assert!((rounded - value).abs() <= Decimal::new(5, 3));
        }

        #[test]
        fn minor_units_round_trip(minor in -1_000_000_000i64..1_000_000_000i64) {
            prop_assert_eq!(Money::from_minor(minor).minor_units(), minor);
        }
    }
}
