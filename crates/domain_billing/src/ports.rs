//! Billing storage ports
//!
//! [`BillingStore`] covers lock-free reads. Every write goes through a
//! [`BillingTx`], a unit of work that the adapter keeps isolated until it
//! commits. Adapters take a row lock (or equivalent) in `lock_bill` and
//! `lock_template`, so two units of work touching the same bill or
//! template run one after the other.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use core_kernel::{
    BillId, ConsumptionId, Quantity, RecurringTemplateId, StoreError, Transactional, UnitOfWork,
    UserId,
};

use crate::allocation::Allocation;
use crate::bill::{Bill, BillStatus, BillType};
use crate::consumption::Consumption;
use crate::payment::Payment;
use crate::recurring::RecurringTemplate;
use crate::subject::{Participant, Subject};

/// Filter criteria for listing bills
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillFilter {
    pub status: Option<BillStatus>,
    pub bill_type: Option<BillType>,
    /// Bills whose period ends on or after this date
    pub period_from: Option<NaiveDate>,
    /// Bills whose period starts on or before this date
    pub period_to: Option<NaiveDate>,
    pub template_id: Option<RecurringTemplateId>,
}

impl BillFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: BillStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, bill_type: BillType) -> Self {
        self.bill_type = Some(bill_type);
        self
    }

    /// Bills whose period overlaps `[from, to]`
    pub fn overlapping(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.period_from = Some(from);
        self.period_to = Some(to);
        self
    }

    pub fn from_template(mut self, template_id: RecurringTemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn matches(&self, bill: &Bill) -> bool {
        self.status.map_or(true, |s| bill.status == s)
            && self.bill_type.map_or(true, |t| bill.bill_type == t)
            && self.period_from.map_or(true, |from| bill.period_end >= from)
            && self.period_to.map_or(true, |to| bill.period_start <= to)
            && self
                .template_id
                .map_or(true, |id| bill.recurring_template_id == Some(id))
    }
}

/// Read side of billing storage
#[async_trait]
pub trait BillingStore: Transactional {
    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, StoreError>;

    /// Bills matching `filter`, newest period first
    async fn list_bills(&self, filter: &BillFilter) -> Result<Vec<Bill>, StoreError>;

    /// All consumptions of a bill, including invalidated ones
    async fn list_consumptions(&self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError>;

    async fn list_allocations(&self, bill_id: BillId) -> Result<Vec<Allocation>, StoreError>;

    async fn list_payments(&self, bill_id: BillId) -> Result<Vec<Payment>, StoreError>;

    async fn payments_by_payer(&self, payer: UserId) -> Result<Vec<Payment>, StoreError>;

    /// Every participant, active or not
    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError>;

    async fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StoreError>;
}

/// Write side of billing storage, scoped to one unit of work
#[async_trait]
pub trait BillingTx: UnitOfWork {
    /// Loads a bill and holds it against concurrent writers until commit
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, StoreError>;

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), StoreError>;

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), StoreError>;

    /// Removes a bill with its consumptions, allocations and payments
    async fn delete_bill(&mut self, id: BillId) -> Result<(), StoreError>;

    async fn consumptions(&mut self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError>;

    async fn find_consumption(&mut self, id: ConsumptionId) -> Result<Option<Consumption>, StoreError>;

    /// Latest valid meter value of `subject` recorded strictly before `before`
    async fn previous_meter_reading(
        &mut self,
        subject: Subject,
        before: DateTime<Utc>,
    ) -> Result<Option<Quantity>, StoreError>;

    async fn insert_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError>;

    async fn update_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError>;

    async fn active_participants(&mut self) -> Result<Vec<Participant>, StoreError>;

    async fn upsert_participant(&mut self, participant: &Participant) -> Result<(), StoreError>;

    /// Deletes every allocation of the bill and writes `allocations` in their place
    async fn replace_allocations(
        &mut self,
        bill_id: BillId,
        allocations: &[Allocation],
    ) -> Result<(), StoreError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn insert_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError>;

    async fn lock_template(
        &mut self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StoreError>;

    async fn update_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError>;
}
