//! Bill aggregate and its lifecycle
//!
//! ```text
//!   create        post          close
//!  ───────▶ Draft ─────▶ Posted ─────▶ Closed
//!                           ▲             │
//!                           └─── reopen ──┘
//! ```
//!
//! Transition methods only mutate the in-memory value. The billing service
//! persists the result together with any allocation rows in one unit of
//! work, so a rejected transition never reaches the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BillId, Money, Quantity, RecurringTemplateId};

use crate::error::BillingError;

/// Kind of household charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillType {
    Electricity,
    Gas,
    Water,
    Internet,
    Rent,
    Other,
}

impl BillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillType::Electricity => "electricity",
            BillType::Gas => "gas",
            BillType::Water => "water",
            BillType::Internet => "internet",
            BillType::Rent => "rent",
            BillType::Other => "other",
        }
    }
}

impl fmt::Display for BillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "electricity" => Ok(BillType::Electricity),
            "gas" => Ok(BillType::Gas),
            "water" => Ok(BillType::Water),
            "internet" => Ok(BillType::Internet),
            "rent" => Ok(BillType::Rent),
            "other" => Ok(BillType::Other),
            other => Err(BillingError::validation(format!("unknown bill type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Draft,
    Posted,
    Closed,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "draft",
            BillStatus::Posted => "posted",
            BillStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(BillStatus::Draft),
            "posted" => Ok(BillStatus::Posted),
            "closed" => Ok(BillStatus::Closed),
            other => Err(BillingError::validation(format!("unknown bill status '{}'", other))),
        }
    }
}

/// How a bill may be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Draft bills only
    #[default]
    Standard,
    /// Any status; requires the administrative override capability
    AdministrativeOverride,
}

/// Input for creating a bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBill {
    pub bill_type: BillType,
    pub custom_label: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_amount: Money,
    pub total_units: Option<Quantity>,
    pub payment_deadline: Option<NaiveDate>,
    pub notes: Option<String>,
    pub recurring_template_id: Option<RecurringTemplateId>,
}

impl NewBill {
    pub fn new(
        bill_type: BillType,
        period_start: NaiveDate,
        period_end: NaiveDate,
        total_amount: Money,
    ) -> Self {
        Self {
            bill_type,
            custom_label: None,
            period_start,
            period_end,
            total_amount,
            total_units: None,
            payment_deadline: None,
            notes: None,
            recurring_template_id: None,
        }
    }

    pub fn with_custom_label(mut self, label: impl Into<String>) -> Self {
        self.custom_label = Some(label.into());
        self
    }

    pub fn with_total_units(mut self, units: Quantity) -> Self {
        self.total_units = Some(units);
        self
    }

    pub fn with_payment_deadline(mut self, deadline: NaiveDate) -> Self {
        self.payment_deadline = Some(deadline);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn from_template(mut self, template_id: RecurringTemplateId) -> Self {
        self.recurring_template_id = Some(template_id);
        self
    }
}

/// Changes allowed on a draft bill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillUpdate {
    pub total_amount: Option<Money>,
    pub period: Option<(NaiveDate, NaiveDate)>,
    pub total_units: Option<Quantity>,
    pub payment_deadline: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// A billable charge for a period, split among subjects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub bill_type: BillType,
    pub custom_label: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_amount: Money,
    /// Units on the supplier's invoice, kept for reference only; shares
    /// come from the recorded consumption
    pub total_units: Option<Quantity>,
    pub payment_deadline: Option<NaiveDate>,
    pub status: BillStatus,
    pub recurring_template_id: Option<RecurringTemplateId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reopened_at: Option<DateTime<Utc>>,
    pub reopen_reason: Option<String>,
}

impl Bill {
    /// Creates a draft bill after validating the input
    pub fn create(new: NewBill) -> Result<Self, BillingError> {
        validate_amount(new.total_amount)?;
        validate_period(new.period_start, new.period_end)?;
        validate_units(new.total_units)?;
        let custom_label = normalize_label(new.bill_type, new.custom_label)?;

        let now = Utc::now();
        Ok(Self {
            id: BillId::new_v7(),
            bill_type: new.bill_type,
            custom_label,
            period_start: new.period_start,
            period_end: new.period_end,
            total_amount: new.total_amount,
            total_units: new.total_units,
            payment_deadline: new.payment_deadline,
            status: BillStatus::Draft,
            recurring_template_id: new.recurring_template_id,
            notes: new.notes,
            created_at: now,
            updated_at: now,
            reopened_at: None,
            reopen_reason: None,
        })
    }

    /// Human-readable bill name, using the custom label for `other` bills
    pub fn display_name(&self) -> &str {
        self.custom_label.as_deref().unwrap_or(self.bill_type.as_str())
    }

    pub fn is_draft(&self) -> bool {
        self.status == BillStatus::Draft
    }

    /// Payments may be recorded once the split is known
    pub fn accepts_payments(&self) -> bool {
        matches!(self.status, BillStatus::Posted | BillStatus::Closed)
    }

    /// Fails unless the bill is in `expected`
    pub fn require_status(&self, expected: BillStatus, action: &'static str) -> Result<(), BillingError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.rejected(action))
        }
    }

    /// Fails if the bill has been closed
    pub fn require_open(&self, action: &'static str) -> Result<(), BillingError> {
        if self.status == BillStatus::Closed {
            Err(self.rejected(action))
        } else {
            Ok(())
        }
    }

    /// Applies draft edits
    pub fn apply_update(&mut self, update: BillUpdate) -> Result<(), BillingError> {
        self.require_status(BillStatus::Draft, "edit")?;

        if let Some(amount) = update.total_amount {
            validate_amount(amount)?;
        }
        if let Some((start, end)) = update.period {
            validate_period(start, end)?;
        }
        validate_units(update.total_units)?;

        if let Some(amount) = update.total_amount {
            self.total_amount = amount;
        }
        if let Some((start, end)) = update.period {
            self.period_start = start;
            self.period_end = end;
        }
        if update.total_units.is_some() {
            self.total_units = update.total_units;
        }
        if update.payment_deadline.is_some() {
            self.payment_deadline = update.payment_deadline;
        }
        if update.notes.is_some() {
            self.notes = update.notes;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// draft → posted
    pub fn post(&mut self) -> Result<(), BillingError> {
        self.transition(BillStatus::Draft, BillStatus::Posted, "post")
    }

    /// posted → closed
    pub fn close(&mut self) -> Result<(), BillingError> {
        self.transition(BillStatus::Posted, BillStatus::Closed, "close")
    }

    /// closed → posted
    pub fn reopen(&mut self, reason: Option<String>) -> Result<(), BillingError> {
        self.transition(BillStatus::Closed, BillStatus::Posted, "reopen")?;
        self.reopened_at = Some(self.updated_at);
        self.reopen_reason = reason;
        Ok(())
    }

    /// Checks whether the bill may be removed under `mode`
    pub fn ensure_deletable(&self, mode: DeleteMode) -> Result<(), BillingError> {
        match mode {
            DeleteMode::Standard => self.require_status(BillStatus::Draft, "delete"),
            DeleteMode::AdministrativeOverride => Ok(()),
        }
    }

    fn transition(
        &mut self,
        from: BillStatus,
        to: BillStatus,
        action: &'static str,
    ) -> Result<(), BillingError> {
        self.require_status(from, action)?;
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn rejected(&self, action: &'static str) -> BillingError {
        BillingError::invalid_transition("bill", self.id, self.status, action)
    }
}

fn validate_amount(amount: Money) -> Result<(), BillingError> {
    if amount.is_negative() {
        return Err(BillingError::validation(format!(
            "total amount must not be negative, got {}",
            amount
        )));
    }
    Ok(())
}

fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), BillingError> {
    if end < start {
        return Err(BillingError::validation(format!(
            "period end {} is before period start {}",
            end, start
        )));
    }
    Ok(())
}

fn validate_units(units: Option<Quantity>) -> Result<(), BillingError> {
    match units {
        Some(units) if !units.is_positive() => Err(BillingError::validation(
            "total units must be greater than zero",
        )),
        _ => Ok(()),
    }
}

fn normalize_label(bill_type: BillType, label: Option<String>) -> Result<Option<String>, BillingError> {
    let label = label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
    if label.is_some() && bill_type != BillType::Other {
        return Err(BillingError::validation(
            "a custom label is only allowed on bills of type 'other'",
        ));
    }
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> Bill {
        Bill::create(NewBill::new(
            BillType::Electricity,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            Money::new(dec!(120.00)),
        ))
        .unwrap()
    }

    #[test]
    fn test_create_starts_in_draft() {
        let bill = draft();
        assert_eq!(bill.status, BillStatus::Draft);
        assert!(!bill.accepts_payments());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut bill = draft();
        bill.post().unwrap();
        bill.close().unwrap();
        bill.reopen(Some("meter corrected".to_string())).unwrap();
        assert_eq!(bill.status, BillStatus::Posted);
        assert!(bill.reopened_at.is_some());
        assert_eq!(bill.reopen_reason.as_deref(), Some("meter corrected"));
    }

    #[test]
    fn test_wrong_state_leaves_bill_untouched() {
        let mut bill = draft();
        let before = bill.clone();
        assert!(bill.close().unwrap_err().is_invalid_transition());
        assert!(bill.reopen(None).unwrap_err().is_invalid_transition());
        assert_eq!(bill, before);
    }

    #[test]
    fn test_negative_total_rejected() {
        let result = Bill::create(NewBill::new(
            BillType::Rent,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            Money::new(dec!(-1.00)),
        ));
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [BillStatus::Draft, BillStatus::Posted, BillStatus::Closed] {
            assert_eq!(status.as_str().parse::<BillStatus>().unwrap(), status);
        }
    }
}
