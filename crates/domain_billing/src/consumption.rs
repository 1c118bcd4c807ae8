//! Consumption readings recorded against draft bills

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use core_kernel::{BillId, ConsumptionId, Quantity};

use crate::error::BillingError;
use crate::subject::Subject;

/// A usage figure weighting one subject's share of a bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub id: ConsumptionId,
    pub bill_id: BillId,
    pub subject: Subject,
    pub quantity: Quantity,
    /// Absolute meter value the quantity was derived from, if any
    pub meter_value: Option<Quantity>,
    pub recorded_at: DateTime<Utc>,
    /// Excluded from allocation but kept for the audit trail
    pub invalid: bool,
}

/// Input for recording a consumption
///
/// Either `quantity` is given directly, or `meter_value` is given and the
/// quantity is the difference from the subject's previous reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConsumption {
    pub bill_id: BillId,
    pub subject: Subject,
    pub quantity: Option<Quantity>,
    pub meter_value: Option<Quantity>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewConsumption {
    pub fn quantity(bill_id: BillId, subject: impl Into<Subject>, quantity: Quantity) -> Self {
        Self {
            bill_id,
            subject: subject.into(),
            quantity: Some(quantity),
            meter_value: None,
            recorded_at: None,
        }
    }

    pub fn meter_reading(bill_id: BillId, subject: impl Into<Subject>, meter_value: Quantity) -> Self {
        Self {
            bill_id,
            subject: subject.into(),
            quantity: None,
            meter_value: Some(meter_value),
            recorded_at: None,
        }
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }
}

/// Works out the quantity a new consumption contributes.
///
/// An explicit quantity must be positive. A meter reading contributes its
/// difference from `previous_meter`, or the full reading when the subject
/// has no earlier one; a reading below the previous one is rejected.
pub fn resolve_quantity(
    new: &NewConsumption,
    previous_meter: Option<Quantity>,
) -> Result<Quantity, BillingError> {
    match (new.quantity, new.meter_value) {
        (Some(quantity), _) => {
            if quantity.is_positive() {
                Ok(quantity)
            } else {
                Err(BillingError::validation("consumption quantity must be greater than zero"))
            }
        }
        (None, Some(meter)) => {
            if meter.value() < Decimal::ZERO {
                return Err(BillingError::validation("meter value must not be negative"));
            }
            match previous_meter {
                Some(previous) if meter < previous => Err(BillingError::validation(format!(
                    "meter reading {} is lower than the previous reading {}",
                    meter, previous
                ))),
                Some(previous) => Ok(meter.since(previous)),
                None => Ok(meter),
            }
        }
        (None, None) => Err(BillingError::validation(
            "either a quantity or a meter value is required",
        )),
    }
}

impl Consumption {
    pub fn record(new: NewConsumption, previous_meter: Option<Quantity>) -> Result<Self, BillingError> {
        let quantity = resolve_quantity(&new, previous_meter)?;
        Ok(Self {
            id: ConsumptionId::new_v7(),
            bill_id: new.bill_id,
            subject: new.subject,
            quantity,
            meter_value: new.meter_value,
            recorded_at: new.recorded_at.unwrap_or_else(Utc::now),
            invalid: false,
        })
    }

    pub fn invalidate(&mut self) -> Result<(), BillingError> {
        if self.invalid {
            return Err(BillingError::invalid_transition(
                "consumption",
                self.id,
                "invalid",
                "invalidate",
            ));
        }
        self.invalid = true;
        Ok(())
    }
}

/// Sums valid consumption per subject, in subject order
pub fn totals_by_subject(consumptions: &[Consumption]) -> BTreeMap<Subject, Quantity> {
    let mut totals: BTreeMap<Subject, Quantity> = BTreeMap::new();
    for consumption in consumptions.iter().filter(|c| !c.invalid) {
        let entry = totals.entry(consumption.subject).or_default();
        *entry = *entry + consumption.quantity;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::UserId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_meter_delta() {
        let new = NewConsumption::meter_reading(BillId::new(), UserId::new(), Quantity::new(dec!(1250.5)));
        let q = resolve_quantity(&new, Some(Quantity::new(dec!(1200.25)))).unwrap();
        assert_eq!(q.value(), dec!(50.25));
    }

    #[test]
    fn test_first_meter_reading_counts_in_full() {
        let new = NewConsumption::meter_reading(BillId::new(), UserId::new(), Quantity::new(dec!(80)));
        assert_eq!(resolve_quantity(&new, None).unwrap().value(), dec!(80));
    }

    #[test]
    fn test_meter_going_backwards_rejected() {
        let new = NewConsumption::meter_reading(BillId::new(), UserId::new(), Quantity::new(dec!(10)));
        assert!(resolve_quantity(&new, Some(Quantity::new(dec!(11)))).is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let new = NewConsumption::quantity(BillId::new(), UserId::new(), Quantity::zero());
        assert!(matches!(resolve_quantity(&new, None), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_totals_skip_invalid_rows() {
        let bill_id = BillId::new();
        let user = UserId::new();
        let mut first = Consumption::record(
            NewConsumption::quantity(bill_id, user, Quantity::new(dec!(5))),
            None,
        )
        .unwrap();
        let second = Consumption::record(
            NewConsumption::quantity(bill_id, user, Quantity::new(dec!(7))),
            None,
        )
        .unwrap();
        first.invalidate().unwrap();

        let totals = totals_by_subject(&[first, second]);
        assert_eq!(totals[&Subject::User(user)].value(), dec!(7));
    }
}
