//! In-memory ledger store
//!
//! Implements the same ports as the PostgreSQL store for tests and local
//! tooling. A unit of work takes the store-wide lock and edits a private
//! copy of the state; commit swaps the copy in, drop throws it away. Units
//! of work therefore run one at a time, which is a stricter form of the
//! row locking the PostgreSQL store does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use core_kernel::{
    BillId, ConsumptionId, DomainPort, HealthCheckResult, HealthCheckable, LoanId, Money, Quantity,
    RecurringTemplateId, StoreError, Transactional, UnitOfWork, UserId,
};
use domain_billing::{
    Allocation, Bill, BillFilter, BillingStore, BillingTx, Consumption, Participant, Payment,
    RecurringTemplate, Subject,
};
use domain_loans::{Loan, LoanFilter, LoanPayment, LoanStore, LoanTx, LoanWithBalance};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    bills: BTreeMap<BillId, Bill>,
    consumptions: Vec<Consumption>,
    allocations: Vec<Allocation>,
    payments: Vec<Payment>,
    participants: BTreeMap<Subject, Participant>,
    templates: BTreeMap<RecurringTemplateId, RecurringTemplate>,
    loans: BTreeMap<LoanId, Loan>,
    loan_payments: Vec<LoanPayment>,
}

impl MemoryState {
    fn paid(&self, loan_id: LoanId) -> Money {
        self.loan_payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .map(|p| p.amount)
            .sum()
    }

    fn with_balance(&self, loan: &Loan) -> LoanWithBalance {
        LoanWithBalance::new(loan.clone(), self.paid(loan.id))
    }

    fn balances(&self, keep: impl Fn(&Loan) -> bool) -> Vec<LoanWithBalance> {
        self.loans
            .values()
            .filter(|l| keep(*l))
            .map(|l| self.with_balance(l))
            .collect()
    }

    fn consumptions_of(&self, bill_id: BillId) -> Vec<Consumption> {
        let mut rows: Vec<Consumption> = self
            .consumptions
            .iter()
            .filter(|c| c.bill_id == bill_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.recorded_at, c.id));
        rows
    }
}

/// Process-local store backed by a mutex-guarded state
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    commit_latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every commit, so deadlines and cancellation can be observed
    /// while a unit of work is still open
    pub fn with_commit_latency(mut self, latency: Duration) -> Self {
        self.commit_latency = Some(latency);
        self
    }
}

impl DomainPort for MemoryStore {}

/// A unit of work against a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    commit_latency: Option<Duration>,
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard,
            staged,
            commit_latency,
        } = self;
        if let Some(latency) = commit_latency {
            tokio::time::sleep(latency).await;
        }
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx {
            guard,
            staged,
            commit_latency: self.commit_latency,
        })
    }
}

#[async_trait]
impl HealthCheckable for MemoryStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("memory-ledger-store", 0)
    }
}

// ============================================================================
// Billing
// ============================================================================

#[async_trait]
impl BillingStore for MemoryStore {
    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, StoreError> {
        Ok(self.state.lock().await.bills.get(&id).cloned())
    }

    async fn list_bills(&self, filter: &BillFilter) -> Result<Vec<Bill>, StoreError> {
        let state = self.state.lock().await;
        let mut bills: Vec<Bill> = state.bills.values().filter(|b| filter.matches(b)).cloned().collect();
        bills.sort_by(|a, b| {
            (b.period_start, b.created_at, b.id).cmp(&(a.period_start, a.created_at, a.id))
        });
        Ok(bills)
    }

    async fn list_consumptions(&self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError> {
        Ok(self.state.lock().await.consumptions_of(bill_id))
    }

    async fn list_allocations(&self, bill_id: BillId) -> Result<Vec<Allocation>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Allocation> = state
            .allocations
            .iter()
            .filter(|a| a.bill_id == bill_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.subject);
        Ok(rows)
    }

    async fn list_payments(&self, bill_id: BillId) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Payment> = state.payments.iter().filter(|p| p.bill_id == bill_id).cloned().collect();
        rows.sort_by_key(|p| (p.paid_at, p.id));
        Ok(rows)
    }

    async fn payments_by_payer(&self, payer: UserId) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Payment> = state.payments.iter().filter(|p| p.payer_id == payer).cloned().collect();
        rows.sort_by_key(|p| (p.paid_at, p.id));
        Ok(rows)
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.state.lock().await.participants.values().cloned().collect())
    }

    async fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StoreError> {
        let state = self.state.lock().await;
        let mut templates: Vec<RecurringTemplate> = state.templates.values().cloned().collect();
        templates.sort_by_key(|t| (t.next_due_date, t.id));
        Ok(templates)
    }
}

#[async_trait]
impl BillingTx for MemoryTx {
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, StoreError> {
        Ok(self.staged.bills.get(&id).cloned())
    }

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), StoreError> {
        if self.staged.bills.contains_key(&bill.id) {
            return Err(StoreError::Constraint {
                message: format!("bill {} already exists", bill.id),
            });
        }
        self.staged.bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), StoreError> {
        match self.staged.bills.get_mut(&bill.id) {
            Some(stored) => {
                *stored = bill.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("bill", bill.id)),
        }
    }

    async fn delete_bill(&mut self, id: BillId) -> Result<(), StoreError> {
        if self.staged.bills.remove(&id).is_none() {
            return Err(StoreError::not_found("bill", id));
        }
        self.staged.consumptions.retain(|c| c.bill_id != id);
        self.staged.allocations.retain(|a| a.bill_id != id);
        self.staged.payments.retain(|p| p.bill_id != id);
        Ok(())
    }

    async fn consumptions(&mut self, bill_id: BillId) -> Result<Vec<Consumption>, StoreError> {
        Ok(self.staged.consumptions_of(bill_id))
    }

    async fn find_consumption(&mut self, id: ConsumptionId) -> Result<Option<Consumption>, StoreError> {
        Ok(self.staged.consumptions.iter().find(|c| c.id == id).cloned())
    }

    async fn previous_meter_reading(
        &mut self,
        subject: Subject,
        before: DateTime<Utc>,
    ) -> Result<Option<Quantity>, StoreError> {
        Ok(self
            .staged
            .consumptions
            .iter()
            .filter(|c| c.subject == subject && !c.invalid && c.recorded_at < before)
            .filter_map(|c| c.meter_value.map(|m| (c.recorded_at, m)))
            .max_by_key(|(at, _)| *at)
            .map(|(_, m)| m))
    }

    async fn insert_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError> {
        if !self.staged.bills.contains_key(&consumption.bill_id) {
            return Err(StoreError::Constraint {
                message: format!("consumption references unknown bill {}", consumption.bill_id),
            });
        }
        self.staged.consumptions.push(consumption.clone());
        Ok(())
    }

    async fn update_consumption(&mut self, consumption: &Consumption) -> Result<(), StoreError> {
        match self.staged.consumptions.iter_mut().find(|c| c.id == consumption.id) {
            Some(stored) => {
                *stored = consumption.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("consumption", consumption.id)),
        }
    }

    async fn active_participants(&mut self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.staged.participants.values().filter(|p| p.active).cloned().collect())
    }

    async fn upsert_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        self.staged
            .participants
            .insert(participant.subject, participant.clone());
        Ok(())
    }

    async fn replace_allocations(
        &mut self,
        bill_id: BillId,
        allocations: &[Allocation],
    ) -> Result<(), StoreError> {
        self.staged.allocations.retain(|a| a.bill_id != bill_id);
        self.staged.allocations.extend_from_slice(allocations);
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if !self.staged.bills.contains_key(&payment.bill_id) {
            return Err(StoreError::Constraint {
                message: format!("payment references unknown bill {}", payment.bill_id),
            });
        }
        self.staged.payments.push(payment.clone());
        Ok(())
    }

    async fn insert_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError> {
        self.staged.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn lock_template(
        &mut self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StoreError> {
        Ok(self.staged.templates.get(&id).cloned())
    }

    async fn update_template(&mut self, template: &RecurringTemplate) -> Result<(), StoreError> {
        match self.staged.templates.get_mut(&template.id) {
            Some(stored) => {
                *stored = template.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("recurring template", template.id)),
        }
    }
}

// ============================================================================
// Loans
// ============================================================================

#[async_trait]
impl LoanStore for MemoryStore {
    async fn find_loan(&self, id: LoanId) -> Result<Option<LoanWithBalance>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.loans.get(&id).map(|l| state.with_balance(l)))
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanWithBalance>, StoreError> {
        Ok(self.state.lock().await.balances(|l| filter.matches(l)))
    }

    async fn list_loan_payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<LoanPayment> = state
            .loan_payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.paid_at, p.id));
        Ok(rows)
    }

    async fn open_loans_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Vec<LoanWithBalance>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .balances(move |l| l.is_open() && l.is_between(user_a, user_b)))
    }

    async fn open_loans(&self) -> Result<Vec<LoanWithBalance>, StoreError> {
        Ok(self.state.lock().await.balances(Loan::is_open))
    }
}

#[async_trait]
impl LoanTx for MemoryTx {
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        Ok(self.staged.loans.get(&id).cloned())
    }

    async fn lock_open_loans(
        &mut self,
        lender: UserId,
        borrower: UserId,
    ) -> Result<Vec<Loan>, StoreError> {
        Ok(self
            .staged
            .loans
            .values()
            .filter(|l| l.is_open() && l.lender_id == lender && l.borrower_id == borrower)
            .cloned()
            .collect())
    }

    async fn lock_all_open_loans(&mut self) -> Result<Vec<Loan>, StoreError> {
        Ok(self.staged.loans.values().filter(|l| l.is_open()).cloned().collect())
    }

    async fn paid_total(&mut self, loan_id: LoanId) -> Result<Money, StoreError> {
        Ok(self.staged.paid(loan_id))
    }

    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        if self.staged.loans.contains_key(&loan.id) {
            return Err(StoreError::Constraint {
                message: format!("loan {} already exists", loan.id),
            });
        }
        self.staged.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn update_loan(&mut self, loan: &Loan) -> Result<(), StoreError> {
        match self.staged.loans.get_mut(&loan.id) {
            Some(stored) => {
                *stored = loan.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("loan", loan.id)),
        }
    }

    async fn delete_loan(&mut self, id: LoanId) -> Result<(), StoreError> {
        if self.staged.loans.remove(&id).is_none() {
            return Err(StoreError::not_found("loan", id));
        }
        self.staged.loan_payments.retain(|p| p.loan_id != id);
        Ok(())
    }

    async fn insert_loan_payment(&mut self, payment: &LoanPayment) -> Result<(), StoreError> {
        if !self.staged.loans.contains_key(&payment.loan_id) {
            return Err(StoreError::Constraint {
                message: format!("payment references unknown loan {}", payment.loan_id),
            });
        }
        self.staged.loan_payments.push(payment.clone());
        Ok(())
    }
}
