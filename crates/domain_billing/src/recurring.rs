//! Recurring bill templates
//!
//! A template produces one draft bill per due date. Generated bills go
//! through the normal post flow; templates never write allocations.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{Money, RecurringTemplateId};

use crate::bill::{BillType, NewBill};
use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn months(&self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::Yearly => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(BillingError::validation(format!("unknown frequency '{}'", other))),
        }
    }
}

/// Returns `day` in the given month, clamped to the month's last day
pub fn clamp_day(year: i32, month: u32, day: u32) -> Result<NaiveDate, BillingError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| BillingError::validation(format!("invalid month {}-{}", year, month)))?;
    let last_day = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .ok_or_else(|| BillingError::validation("date out of range"))?;
    NaiveDate::from_ymd_opt(year, month, day.min(last_day))
        .ok_or_else(|| BillingError::validation("date out of range"))
}

fn shift_month(date: NaiveDate, months: u32) -> Result<(i32, u32), BillingError> {
    let first = date
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(months)))
        .ok_or_else(|| BillingError::validation("date out of range"))?;
    Ok((first.year(), first.month()))
}

/// First occurrence of `day` on or after `start`
pub fn first_due_date(start: NaiveDate, day: u32) -> Result<NaiveDate, BillingError> {
    let candidate = clamp_day(start.year(), start.month(), day)?;
    if candidate >= start {
        return Ok(candidate);
    }
    let (year, month) = shift_month(start, 1)?;
    clamp_day(year, month, day)
}

/// Due date one period after `current`, keeping the template's day.
///
/// Clamping is applied per month, so a template on the 31st goes
/// Jan 31 → Feb 28 → Mar 31 rather than drifting to the 28th.
pub fn next_due_date(current: NaiveDate, day: u32, frequency: Frequency) -> Result<NaiveDate, BillingError> {
    let (year, month) = shift_month(current, frequency.months())?;
    clamp_day(year, month, day)
}

/// Billing period covered by the bill due on `due`
pub fn period_for(due: NaiveDate, frequency: Frequency) -> Result<(NaiveDate, NaiveDate), BillingError> {
    let start = due
        .checked_sub_months(Months::new(frequency.months()))
        .ok_or_else(|| BillingError::validation("date out of range"))?;
    Ok((start, due))
}

/// Input for creating a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub bill_type: BillType,
    pub custom_label: Option<String>,
    pub amount: Money,
    pub frequency: Frequency,
    pub day_of_month: u32,
    pub start_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTemplate {
    pub id: RecurringTemplateId,
    pub name: String,
    pub bill_type: BillType,
    pub custom_label: Option<String>,
    pub amount: Money,
    pub frequency: Frequency,
    pub day_of_month: u32,
    pub start_date: NaiveDate,
    pub next_due_date: NaiveDate,
    pub active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RecurringTemplate {
    pub fn create(new: NewTemplate) -> Result<Self, BillingError> {
        if new.name.trim().is_empty() {
            return Err(BillingError::validation("template name must not be empty"));
        }
        if !(1..=31).contains(&new.day_of_month) {
            return Err(BillingError::validation(format!(
                "day of month must be between 1 and 31, got {}",
                new.day_of_month
            )));
        }
        if !new.amount.is_positive() {
            return Err(BillingError::validation("template amount must be greater than zero"));
        }

        Ok(Self {
            id: RecurringTemplateId::new_v7(),
            name: new.name.trim().to_string(),
            bill_type: new.bill_type,
            custom_label: new.custom_label,
            amount: new.amount,
            frequency: new.frequency,
            day_of_month: new.day_of_month,
            start_date: new.start_date,
            next_due_date: first_due_date(new.start_date, new.day_of_month)?,
            active: true,
            notes: new.notes,
            created_at: Utc::now(),
        })
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.active && self.next_due_date <= today
    }

    /// Draft bill for the current due date
    pub fn draft_bill(&self) -> Result<NewBill, BillingError> {
        let (start, end) = period_for(self.next_due_date, self.frequency)?;
        let mut bill = NewBill::new(self.bill_type, start, end, self.amount)
            .with_payment_deadline(self.next_due_date)
            .from_template(self.id);
        bill.custom_label = self.custom_label.clone();
        bill.notes = self.notes.clone();
        Ok(bill)
    }

    /// Moves the template to its following due date
    pub fn advance(&mut self) -> Result<(), BillingError> {
        self.next_due_date = next_due_date(self.next_due_date, self.day_of_month, self.frequency)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_clamp_to_month_end() {
        assert_eq!(clamp_day(2026, 2, 31).unwrap(), date(2026, 2, 28));
        assert_eq!(clamp_day(2028, 2, 30).unwrap(), date(2028, 2, 29));
        assert_eq!(clamp_day(2026, 4, 31).unwrap(), date(2026, 4, 30));
    }

    #[test]
    fn test_monthly_keeps_day_after_short_month() {
        let feb = next_due_date(date(2026, 1, 31), 31, Frequency::Monthly).unwrap();
        assert_eq!(feb, date(2026, 2, 28));
        let mar = next_due_date(feb, 31, Frequency::Monthly).unwrap();
        assert_eq!(mar, date(2026, 3, 31));
    }

    #[test]
    fn test_quarterly_and_yearly() {
        assert_eq!(
            next_due_date(date(2026, 11, 15), 15, Frequency::Quarterly).unwrap(),
            date(2027, 2, 15)
        );
        assert_eq!(
            next_due_date(date(2028, 2, 29), 29, Frequency::Yearly).unwrap(),
            date(2029, 2, 28)
        );
    }

    #[test]
    fn test_first_due_date() {
        assert_eq!(first_due_date(date(2026, 5, 10), 15).unwrap(), date(2026, 5, 15));
        assert_eq!(first_due_date(date(2026, 5, 20), 15).unwrap(), date(2026, 6, 15));
        assert_eq!(first_due_date(date(2026, 5, 15), 15).unwrap(), date(2026, 5, 15));
    }

    #[test]
    fn test_period_for() {
        assert_eq!(
            period_for(date(2026, 3, 31), Frequency::Monthly).unwrap(),
            (date(2026, 2, 28), date(2026, 3, 31))
        );
    }
}
