//! Loan tables: loans and loan_payments
//!
//! Outstanding balances are computed in SQL from the payment rows on every
//! read; nothing about repayment progress is stored on the loan row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use core_kernel::{LoanId, LoanPaymentId, Money, StoreError, UserId};
use domain_loans::{
    Loan, LoanFilter, LoanPayment, LoanPaymentKind, LoanStatus, LoanStore, LoanTx, LoanWithBalance,
};

use crate::error::db_to_store_error;
use crate::store::{PgLedgerStore, PgTx};

const LOAN_COLUMNS: &str =
    "l.loan_id, l.lender_id, l.borrower_id, l.principal, l.status, l.note, l.due_date, l.created_at, l.settled_at";

#[derive(Debug, FromRow)]
struct LoanRow {
    loan_id: Uuid,
    lender_id: Uuid,
    borrower_id: Uuid,
    principal: Decimal,
    status: String,
    note: Option<String>,
    due_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        let status = LoanStatus::from_str(&row.status)
            .map_err(|e| StoreError::corrupt(format!("status: {}", e)))?;
        Ok(Loan {
            id: LoanId::from_uuid(row.loan_id),
            lender_id: UserId::from_uuid(row.lender_id),
            borrower_id: UserId::from_uuid(row.borrower_id),
            principal: Money::new(row.principal),
            status,
            note: row.note,
            due_date: row.due_date,
            created_at: row.created_at,
            settled_at: row.settled_at,
        })
    }
}

/// A loan row joined with the sum of its payments
#[derive(Debug, FromRow)]
struct LoanBalanceRow {
    #[sqlx(flatten)]
    loan: LoanRow,
    paid: Decimal,
}

impl TryFrom<LoanBalanceRow> for LoanWithBalance {
    type Error = StoreError;

    fn try_from(row: LoanBalanceRow) -> Result<Self, Self::Error> {
        Ok(LoanWithBalance::new(Loan::try_from(row.loan)?, Money::new(row.paid)))
    }
}

#[derive(Debug, FromRow)]
struct LoanPaymentRow {
    loan_payment_id: Uuid,
    loan_id: Uuid,
    amount: Decimal,
    kind: String,
    paid_at: DateTime<Utc>,
    note: Option<String>,
}

impl TryFrom<LoanPaymentRow> for LoanPayment {
    type Error = StoreError;

    fn try_from(row: LoanPaymentRow) -> Result<Self, Self::Error> {
        let kind = LoanPaymentKind::from_str(&row.kind)
            .map_err(|e| StoreError::corrupt(format!("kind: {}", e)))?;
        Ok(LoanPayment {
            id: LoanPaymentId::from_uuid(row.loan_payment_id),
            loan_id: LoanId::from_uuid(row.loan_id),
            amount: Money::new(row.amount),
            kind,
            paid_at: row.paid_at,
            note: row.note,
        })
    }
}

/// Selects loans with their paid totals; callers append `WHERE` clauses
fn balance_query<'a>() -> QueryBuilder<'a, Postgres> {
    QueryBuilder::new(format!(
        "SELECT {LOAN_COLUMNS}, COALESCE(SUM(p.amount), 0) AS paid \
         FROM loans l LEFT JOIN loan_payments p ON p.loan_id = l.loan_id WHERE TRUE"
    ))
}

async fn fetch_balances<'e, E: PgExecutor<'e>>(
    executor: E,
    mut query: QueryBuilder<'_, Postgres>,
) -> Result<Vec<LoanWithBalance>, StoreError> {
    query.push(" GROUP BY l.loan_id ORDER BY l.loan_id");
    query
        .build_query_as::<LoanBalanceRow>()
        .fetch_all(executor)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(LoanWithBalance::try_from)
        .collect()
}

async fn sum_paid<'e, E: PgExecutor<'e>>(executor: E, loan_id: LoanId) -> Result<Money, StoreError> {
    let paid = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM loan_payments WHERE loan_id = $1",
    )
    .bind(*loan_id.as_uuid())
    .fetch_one(executor)
    .await
    .map_err(db_to_store_error)?;
    Ok(Money::new(paid))
}

#[async_trait]
impl LoanStore for PgLedgerStore {
    #[instrument(skip(self), fields(loan_id = %id))]
    async fn find_loan(&self, id: LoanId) -> Result<Option<LoanWithBalance>, StoreError> {
        let mut query = balance_query();
        query.push(" AND l.loan_id = ").push_bind(*id.as_uuid());
        Ok(fetch_balances(&self.pool, query).await?.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanWithBalance>, StoreError> {
        let mut query = balance_query();
        if let Some(user) = filter.user {
            let user = *user.as_uuid();
            query
                .push(" AND (l.lender_id = ")
                .push_bind(user)
                .push(" OR l.borrower_id = ")
                .push_bind(user)
                .push(")");
        }
        if let Some(status) = filter.status {
            query.push(" AND l.status = ").push_bind(status.as_str());
        }
        fetch_balances(&self.pool, query).await
    }

    async fn list_loan_payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>, StoreError> {
        sqlx::query_as::<_, LoanPaymentRow>(
            "SELECT loan_payment_id, loan_id, amount, kind, paid_at, note \
             FROM loan_payments WHERE loan_id = $1 ORDER BY paid_at, loan_payment_id",
        )
        .bind(*loan_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_store_error)?
        .into_iter()
        .map(LoanPayment::try_from)
        .collect()
    }

    async fn open_loans_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Vec<LoanWithBalance>, StoreError> {
        let (a, b) = (*user_a.as_uuid(), *user_b.as_uuid());
        let mut query = balance_query();
        query
            .push(" AND l.status = 'open' AND ((l.lender_id = ")
            .push_bind(a)
            .push(" AND l.borrower_id = ")
            .push_bind(b)
            .push(") OR (l.lender_id = ")
            .push_bind(b)
            .push(" AND l.borrower_id = ")
            .push_bind(a)
            .push("))");
        fetch_balances(&self.pool, query).await
    }

    async fn open_loans(&self) -> Result<Vec<LoanWithBalance>, StoreError> {
        let mut query = balance_query();
        query.push(" AND l.status = 'open'");
        fetch_balances(&self.pool, query).await
    }
}

#[async_trait]
impl LoanTx for PgTx {
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM loans l WHERE l.loan_id = $1 FOR UPDATE");
        sqlx::query_as::<_, LoanRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn())
            .await
            .map_err(db_to_store_error)?
            .map(Loan::try_from)
            .transpose()
    }

    async fn lock_open_loans(
        &mut self,
        lender: UserId,
        borrower: UserId,
    ) -> Result<Vec<Loan>, StoreError> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loans l \
             WHERE l.lender_id = $1 AND l.borrower_id = $2 AND l.status = 'open' \
             ORDER BY l.loan_id FOR UPDATE"
        );
        sqlx::query_as::<_, LoanRow>(&sql)
            .bind(*lender.as_uuid())
            .bind(*borrower.as_uuid())
            .fetch_all(self.conn())
            .await
            .map_err(db_to_store_error)?
            .into_iter()
            .map(Loan::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn lock_all_open_loans(&mut self) -> Result<Vec<Loan>, StoreError> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loans l WHERE l.status = 'open' ORDER BY l.loan_id FOR UPDATE"
        );
        sqlx::query_as::<_, LoanRow>(&sql)
            .fetch_all(self.conn())
            .await
            .map_err(db_to_store_error)?
            .into_iter()
            .map(Loan::try_from)
            .collect()
    }

    async fn paid_total(&mut self, loan_id: LoanId) -> Result<Money, StoreError> {
        sum_paid(self.conn(), loan_id).await
    }

    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO loans (loan_id, lender_id, borrower_id, principal, status, note, due_date, \
             created_at, settled_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(*loan.id.as_uuid())
        .bind(*loan.lender_id.as_uuid())
        .bind(*loan.borrower_id.as_uuid())
        .bind(loan.principal.amount())
        .bind(loan.status.as_str())
        .bind(loan.note.as_deref())
        .bind(loan.due_date)
        .bind(loan.created_at)
        .bind(loan.settled_at)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE loans SET status = $2, note = $3, due_date = $4, settled_at = $5 WHERE loan_id = $1",
        )
        .bind(*loan.id.as_uuid())
        .bind(loan.status.as_str())
        .bind(loan.note.as_deref())
        .bind(loan.due_date)
        .bind(loan.settled_at)
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("loan", loan.id));
        }
        Ok(())
    }

    async fn delete_loan(&mut self, id: LoanId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM loans WHERE loan_id = $1")
            .bind(*id.as_uuid())
            .execute(self.conn())
            .await
            .map_err(db_to_store_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("loan", id));
        }
        Ok(())
    }

    async fn insert_loan_payment(&mut self, payment: &LoanPayment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO loan_payments (loan_payment_id, loan_id, amount, kind, paid_at, note) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*payment.id.as_uuid())
        .bind(*payment.loan_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.kind.as_str())
        .bind(payment.paid_at)
        .bind(payment.note.as_deref())
        .execute(self.conn())
        .await
        .map_err(db_to_store_error)?;
        Ok(())
    }
}
