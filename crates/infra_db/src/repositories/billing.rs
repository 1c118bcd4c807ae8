//! Billing tables: bills, consumptions, allocations, payments,
//! participants and recurring templates
//!
//! Query functions are generic over [`PgExecutor`] so the same SQL serves
//! pool reads and transactional writes. Row structs mirror the table
//! columns and convert into domain types, reporting unparseable values as
//! [`StoreError::Corrupt`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgExecutor, Postgres, QueryBuilder};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    AllocationId, BillId, ConsumptionId, Money, PaymentId, Quantity, RecurringTemplateId,
    StoreError, UserId,
};
use domain_billing::{
    Allocation, Bill, BillFilter, BillingStore, BillingTx, Consumption, Participant, Payment,
    RecurringTemplate, Subject,
};

use crate::error::db_to_store_error;
use crate::store::{PgLedgerStore, PgTx};

fn parse_column<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| StoreError::corrupt(format!("{}: {}", column, e)))
}

fn subject_from(kind: &str, id: Uuid) -> Result<Subject, StoreError> {
    Ok(Subject::from_parts(parse_column("subject_type", kind)?, id))
}

fn expect_one(rows: u64, entity: &str, id: impl Display) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::not_found(entity, id))
    } else {
        Ok(())
    }
}

// ============================================================================
// Row types
// ============================================================================

const BILL_COLUMNS: &str = "bill_id, bill_type, custom_label, period_start, period_end, \
     total_amount, total_units, payment_deadline, status, recurring_template_id, notes, \
     created_at, updated_at, reopened_at, reopen_reason";

#[derive(Debug, FromRow)]
struct BillRow {
    bill_id: Uuid,
    bill_type: String,
    custom_label: Option<String>,
    period_start: NaiveDate,
    period_end: NaiveDate,
    total_amount: Decimal,
    total_units: Option<Decimal>,
    payment_deadline: Option<NaiveDate>,
    status: String,
    recurring_template_id: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reopened_at: Option<DateTime<Utc>>,
    reopen_reason: Option<String>,
}

impl TryFrom<BillRow> for Bill {
    type Error = StoreError;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        Ok(Bill {
            id: BillId::from_uuid(row.bill_id),
            bill_type: parse_column("bill_type", &row.bill_type)?,
            custom_label: row.custom_label,
            period_start: row.period_start,
            period_end: row.period_end,
            total_amount: Money::new(row.total_amount),
            total_units: row.total_units.map(Quantity::new),
            payment_deadline: row.payment_deadline,
            status: parse_column("status", &row.status)?,
            recurring_template_id: row.recurring_template_id.map(RecurringTemplateId::from_uuid),
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            reopened_at: row.reopened_at,
            reopen_reason: row.reopen_reason,
        })
    }
}

const CONSUMPTION_COLUMNS: &str =
    "consumption_id, bill_id, subject_type, subject_id, quantity, meter_value, recorded_at, invalid";

#[derive(Debug, FromRow)]
struct ConsumptionRow {
    consumption_id: Uuid,
    bill_id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    quantity: Decimal,
    meter_value: Option<Decimal>,
    recorded_at: DateTime<Utc>,
    invalid: bool,
}

impl TryFrom<ConsumptionRow> for Consumption {
    type Error = StoreError;

    fn try_from(row: ConsumptionRow) -> Result<Self, Self::Error> {
        Ok(Consumption {
            id: ConsumptionId::from_uuid(row.consumption_id),
            bill_id: BillId::from_uuid(row.bill_id),
            subject: subject_from(&row.subject_type, row.subject_id)?,
            quantity: Quantity::new(row.quantity),
            meter_value: row.meter_value.map(Quantity::new),
            recorded_at: row.recorded_at,
            invalid: row.invalid,
        })
    }
}

#[derive(Debug, FromRow)]
struct AllocationRow {
    allocation_id: Uuid,
    bill_id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    allocated_amount: Decimal,
    basis: String,
    weight: Decimal,
    computed_at: DateTime<Utc>,
}

impl TryFrom<AllocationRow> for Allocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        Ok(Allocation {
            id: AllocationId::from_uuid(row.allocation_id),
            bill_id: BillId::from_uuid(row.bill_id),
            subject: subject_from(&row.subject_type, row.subject_id)?,
            allocated_amount: Money::new(row.allocated_amount),
            basis: parse_column("basis", &row.basis)?,
            weight: row.weight,
            computed_at: row.computed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    bill_id: Uuid,
    payer_id: Uuid,
    amount: Decimal,
    paid_at: DateTime<Utc>,
    note: Option<String>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: PaymentId::from_uuid(row.payment_id),
            bill_id: BillId::from_uuid(row.bill_id),
            payer_id: UserId::from_uuid(row.payer_id),
            amount: Money::new(row.amount),
            paid_at: row.paid_at,
            note: row.note,
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    subject_type: String,
    subject_id: Uuid,
    weight: Decimal,
    members: Vec<Uuid>,
    active: bool,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Participant {
            subject: subject_from(&row.subject_type, row.subject_id)?,
            weight: row.weight,
            members: row.members.into_iter().map(UserId::from_uuid).collect(),
            active: row.active,
        })
    }
}

const TEMPLATE_COLUMNS: &str = "template_id, name, bill_type, custom_label, amount, frequency, \
     day_of_month, start_date, next_due_date, active, notes, created_at";

#[derive(Debug, FromRow)]
struct TemplateRow {
    template_id: Uuid,
    name: String,
    bill_type: String,
    custom_label: Option<String>,
    amount: Decimal,
    frequency: String,
    day_of_month: i32,
    start_date: NaiveDate,
    next_due_date: NaiveDate,
    active: bool,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for RecurringTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let day_of_month = u32::try_from(row.day_of_month)
            .map_err(|_| StoreError::corrupt(format!("day_of_month: {}", row.day_of_month)))?;
        Ok(RecurringTemplate {
            id: RecurringTemplateId::from_uuid(row.template_id),
            name: row.name,
            bill_type: parse_column("bill_type", &row.bill_type)?,
            custom_label: row.custom_label,
            amount: Money::new(row.amount),
            frequency: parse_column("frequency", &row.frequency)?,
            day_of_month,
            start_date: row.start_date,
            next_due_date: row.next_due_date,
            active: row.active,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Queries
// ============================================================================

async fn fetch_bill<'e, E: PgExecutor<'e>>(
    executor: E,
    id: BillId,
    for_update: bool,
) -> Result<Option<Bill>, StoreError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {BILL_COLUMNS} FROM bills WHERE bill_id = $1{lock}");
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_to_store_error)?
        .map(Bill::try_from)
        .transpose()
}

async fn fetch_bills<'e, E: PgExecutor<'e>>(
    executor: E,
    filter: &BillFilter,
) -> Result<Vec<Bill>, StoreError> {
    let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {BILL_COLUMNS} FROM bills WHERE TRUE"));
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(bill_type) = filter.bill_type {
        query.push(" AND bill_type = ").push_bind(bill_type.as_str());
    }
    if let Some(from) = filter.period_from {
        query.push(" AND period_end >= ").push_bind(from);
    }
    if let Some(to) = filter.period_to {
        query.push(" AND period_start <= ").push_bind(to);
    }
    if let Some(template_id) = filter.template_id {
        query
            .push(" AND recurring_template_id = ")
            .push_bind(*template_id.as_uuid());
    }
    query.push(" ORDER BY period_start DESC, created_at DESC, bill_id DESC");

    query
        .build_query_as::<BillRow>()
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(Bill::try_from)
        .collect()
}

async fn fetch_consumptions<'e, E: PgExecutor<'e>>(
    executor: E,
    bill_id: BillId,
) -> Result<Vec<Consumption>, StoreError> {
    let sql = format!(
        "SELECT {CONSUMPTION_COLUMNS} FROM consumptions WHERE bill_id = $1 \
         ORDER BY recorded_at, consumption_id"
    );
    sqlx::query_as::<_, ConsumptionRow>(&sql)
        .bind(*bill_id.as_uuid())
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(Consumption::try_from)
        .collect()
}

/// Matches `Subject`'s ordering: id first, then users before groups
const SUBJECT_ORDER: &str = "subject_id, CASE subject_type WHEN 'user' THEN 0 ELSE 1 END";

async fn fetch_allocations<'e, E: PgExecutor<'e>>(
    executor: E,
    bill_id: BillId,
) -> Result<Vec<Allocation>, StoreError> {
    let sql = format!(
        "SELECT allocation_id, bill_id, subject_type, subject_id, allocated_amount, basis, weight, computed_at \
         FROM allocations WHERE bill_id = $1 ORDER BY {SUBJECT_ORDER}"
    );
    sqlx::query_as::<_, AllocationRow>(&sql)
        .bind(*bill_id.as_uuid())
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(Allocation::try_from)
        .collect()
}

async fn fetch_payments<'e, E: PgExecutor<'e>>(
    executor: E,
    column: &'static str,
    id: Uuid,
) -> Result<Vec<Payment>, StoreError> {
    let sql = format!(
        "SELECT payment_id, bill_id, payer_id, amount, paid_at, note \
         FROM payments WHERE {column} = $1 ORDER BY paid_at, payment_id"
    );
    let rows = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(id)
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?;
    Ok(rows.into_iter().map(Payment::from).collect())
}

async fn fetch_participants<'e, E: PgExecutor<'e>>(
    executor: E,
    active_only: bool,
) -> Result<Vec<Participant>, StoreError> {
    let filter = if active_only { " WHERE active" } else { "" };
    let sql = format!(
        "SELECT subject_type, subject_id, weight, members, active FROM participants{filter} \
         ORDER BY {SUBJECT_ORDER}"
    );
    sqlx::query_as::<_, ParticipantRow>(&sql)
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(Participant::try_from)
        .collect()
}

async fn fetch_template<'e, E: PgExecutor<'e>>(
    executor: E,
    id: RecurringTemplateId,
) -> Result<Option<RecurringTemplate>, StoreError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates WHERE template_id = $1 FOR UPDATE");
    sqlx::query_as::<_, TemplateRow>(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_to_store_error)?
        .map(RecurringTemplate::try_from)
        .transpose()
}

// ============================================================================
// Port implementations
// ============================================================================

#[async_trait]
impl BillingStore for PgLedgerStore {
    #[instrument(skip(self), fields(bill_id = %id))]
    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, StoreError> {
        fetch_bill(&self.pool, id, false).await
    }

    #[instrument(skip(self))]
    async fn list_bills(&self, filter: &BillFilter) -> Result<Vec<Bill>, StoreError> {
        fetch_bills(&self.pool, filter).await
    }

    async fn list_consumptions(&self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError> {
        fetch_consumptions(&self.pool, bill_id).await
    }

    async fn list_allocations(&self, bill_id: BillId) -> Result<Vec<Allocation>, StoreError> {
        fetch_allocations(&self.pool, bill_id).await
    }

    async fn list_payments(&self, bill_id: BillId) -> Result<Vec<Payment>, StoreError> {
        fetch_payments(&self.pool, "bill_id", *bill_id.as_uuid()).await
    }

    async fn payments_by_payer(&self, payer: UserId) -> Result<Vec<Payment>, StoreError> {
        fetch_payments(&self.pool, "payer_id", *payer.as_uuid()).await
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError> {
        fetch_participants(&self.pool, false).await
    }

    async fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StoreError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates ORDER BY next_due_date, template_id");
        sqlx::query_as::<_, TemplateRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_to_store_error)?
            .into_iter()
            .map(RecurringTemplate::try_from)
            .collect()
    }
}

async fn write_bill(conn: &mut PgConnection, bill: &Bill, insert: bool) -> Result<(), StoreError> {
    let sql = if insert {
        "INSERT INTO bills (bill_id, bill_type, custom_label, period_start, period_end, total_amount, \
         total_units, payment_deadline, status, recurring_template_id, notes, created_at, updated_at, \
         reopened_at, reopen_reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    } else {
        "UPDATE bills SET bill_type = $2, custom_label = $3, period_start = $4, period_end = $5, \
         total_amount = $6, total_units = $7, payment_deadline = $8, status = $9, \
         recurring_template_id = $10, notes = $11, created_at = $12, updated_at = $13, \
         reopened_at = $14, reopen_reason = $15 \
         WHERE bill_id = $1"
    };
    let result = sqlx::query(sql)
        .bind(*bill.id.as_uuid())
        .bind(bill.bill_type.as_str())
        .bind(bill.custom_label.as_deref())
        .bind(bill.period_start)
        .bind(bill.period_end)
        .bind(bill.total_amount.amount())
        .bind(bill.total_units.map(|u| u.value()))
        .bind(bill.payment_deadline)
        .bind(bill.status.as_str())
        .bind(bill.recurring_template_id.map(|id| *id.as_uuid()))
        .bind(bill.notes.as_deref())
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .bind(bill.reopened_at)
        .bind(bill.reopen_reason.as_deref())
        .execute(conn)
        .await
        .map_err(db_to_store_error)?;
    expect_one(result.rows_affected(), "bill", bill.id)
}

#[async_trait]
impl BillingTx for PgTx {
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, StoreError> {
        fetch_bill(self.conn(), id, true).await
    }

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), StoreError> {
        write_bill(self.conn(), bill, true).await
    }

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), StoreError> {
        write_bill(self.conn(), bill, false).await
    }

    async fn delete_bill(&mut self, id: BillId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM bills WHERE bill_id = $1")
            .bind(*id.as_uuid())
            .execute(self.conn())
            .await
            .map_err(db_to_store_error)?;
        expect_one(result.rows_affected(), "bill", id)
    }

    async fn consumptions(&mut self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError> {
        fetch_consumptions(self.conn(), bill_id).await
    }

    async fn find_consumption(&mut self, id: ConsumptionId) -> Result<Option<Consumption>, StoreError> {
        let sql = format!("SELECT {CONSUMPTION_COLUMNS} FROM consumptions WHERE consumption_id = $1");
        sqlx::query_as::<_, ConsumptionRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn())
            .await
            .map_err(db_to_store_error)?
            .map(Consumption::try_from)
            .transpose()
    }

    async fn previous_meter_reading(
        &mut self,
        subject: Subject,
        before: DateTime<Utc>,
    ) -> Result<Option<Quantity>, StoreError> {
        let value = sqlx::query_scalar::<_, Decimal>(
            "SELECT meter_value FROM consumptions \
             WHERE subject_type = $1 AND subject_id = $2 AND meter_value IS NOT NULL \
               AND NOT invalid AND recorded_at < $3 \
             ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(subject.kind().as_str())
        .bind(subject.uuid())
        .bind(before)
        .fetch_optional(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(value.map(Quantity::new))
    }

    async fn insert_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO consumptions (consumption_id, bill_id, subject_type, subject_id, quantity, \
             meter_value, recorded_at, invalid) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(*consumption.id.as_uuid())
        .bind(*consumption.bill_id.as_uuid())
        .bind(consumption.subject.kind().as_str())
        .bind(consumption.subject.uuid())
        .bind(consumption.quantity.value())
        .bind(consumption.meter_value.map(|m| m.value()))
        .bind(consumption.recorded_at)
        .bind(consumption.invalid)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }

    async fn update_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE consumptions SET quantity = $2, meter_value = $3, recorded_at = $4, invalid = $5 \
             WHERE consumption_id = $1",
        )
        .bind(*consumption.id.as_uuid())
        .bind(consumption.quantity.value())
        .bind(consumption.meter_value.map(|m| m.value()))
        .bind(consumption.recorded_at)
        .bind(consumption.invalid)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        expect_one(result.rows_affected(), "consumption", consumption.id)
    }

    async fn active_participants(&mut self) -> Result<Vec<Participant>, StoreError> {
        fetch_participants(self.conn(), true).await
    }

    async fn upsert_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        let members: Vec<Uuid> = participant.members.iter().map(|m| *m.as_uuid()).collect();
        sqlx::query(
            "INSERT INTO participants (subject_type, subject_id, weight, members, active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (subject_type, subject_id) DO UPDATE \
             SET weight = EXCLUDED.weight, members = EXCLUDED.members, active = EXCLUDED.active",
        )
        .bind(participant.subject.kind().as_str())
        .bind(participant.subject.uuid())
        .bind(participant.weight)
        .bind(members)
        .bind(participant.active)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }

    #[instrument(skip(self, allocations), fields(bill_id = %bill_id, count = allocations.len()))]
    async fn replace_allocations(
        &mut self,
        bill_id: BillId,
        allocations: &[Allocation],
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let removed = sqlx::query("DELETE FROM allocations WHERE bill_id = $1")
            .bind(*bill_id.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(db_to_store_error)?
            .rows_affected();
        debug!(removed, "Cleared previous allocations");

        for allocation in allocations {
            sqlx::query(
                "INSERT INTO allocations (allocation_id, bill_id, subject_type, subject_id, \
                 allocated_amount, basis, weight, computed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(*allocation.id.as_uuid())
            .bind(*allocation.bill_id.as_uuid())
            .bind(allocation.subject.kind().as_str())
            .bind(allocation.subject.uuid())
            .bind(allocation.allocated_amount.amount())
            .bind(allocation.basis.as_str())
            .bind(allocation.weight)
            .bind(allocation.computed_at)
            .execute(&mut *conn)
            .await
            .map_err(db_to_store_error)?;
        }
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (payment_id, bill_id, payer_id, amount, paid_at, note) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*payment.id.as_uuid())
        .bind(*payment.bill_id.as_uuid())
        .bind(*payment.payer_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.paid_at)
        .bind(payment.note.as_deref())
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }

    async fn insert_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO recurring_templates (template_id, name, bill_type, custom_label, amount, \
             frequency, day_of_month, start_date, next_due_date, active, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*template.id.as_uuid())
        .bind(&template.name)
        .bind(template.bill_type.as_str())
        .bind(template.custom_label.as_deref())
        .bind(template.amount.amount())
        .bind(template.frequency.as_str())
        .bind(template.day_of_month as i32)
        .bind(template.start_date)
        .bind(template.next_due_date)
        .bind(template.active)
        .bind(template.notes.as_deref())
        .bind(template.created_at)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }

    async fn lock_template(
        &mut self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StoreError> {
        fetch_template(self.conn(), id).await
    }

    async fn update_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE recurring_templates SET name = $2, amount = $3, next_due_date = $4, \
             active = $5, notes = $6 WHERE template_id = $1",
        )
        .bind(*template.id.as_uuid())
        .bind(&template.name)
        .bind(template.amount.amount())
        .bind(template.next_due_date)
        .bind(template.active)
        .bind(template.notes.as_deref())
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        expect_one(result.rows_affected(), "recurring template", template.id)
    }
}
