//! Loan service
//!
//! Every write locks the loan rows it touches before reading their payment
//! totals, so the overpayment check never runs against a stale sum.
//! Compensation locks both loans in id order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::{
    AllowAll, Authorizer, Capability, EventSink, LedgerEvent, LoanId, Money, RequestContext,
    UnitOfWork, UserId,
};

use crate::balance::{pair_balance, settle_up, LoanWithBalance, SettleUp};
use crate::error::LoanError;
use crate::group::{plan_group_compensation, GroupMembership};
use crate::loan::{compensation_offset, Loan, LoanPayment, NewLoan, NewLoanPayment};
use crate::ports::{LoanFilter, LoanStore, LoanTx};

/// Outcome of netting two opposing loans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compensation {
    pub offset: Money,
    pub loan_a: LoanWithBalance,
    pub loan_b: LoanWithBalance,
}

impl Compensation {
    fn settled(&self) -> impl Iterator<Item = LoanId> + '_ {
        [&self.loan_a, &self.loan_b]
            .into_iter()
            .filter(|l| !l.loan.is_open())
            .map(|l| l.loan.id)
    }
}

/// Result of a group compensation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCompensation {
    /// One entry per netting step, in the order they were applied
    pub compensations: Vec<Compensation>,
    pub total: Money,
}

/// A loan created together with any automatic offsets it triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedLoan {
    pub loan: LoanWithBalance,
    pub offsets: Vec<Compensation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedLoanPayment {
    pub payment: LoanPayment,
    pub loan: LoanWithBalance,
}

/// Loan, repayment, compensation and balance operations
pub struct LoanService<S, A = AllowAll> {
    store: S,
    authorizer: A,
    events: Arc<dyn EventSink>,
    auto_offset: bool,
}

impl<S> LoanService<S, AllowAll> {
    pub fn new(store: S, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            authorizer: AllowAll,
            events,
            auto_offset: false,
        }
    }
}

impl<S, A> LoanService<S, A> {
    pub fn with_authorizer<B: Authorizer>(self, authorizer: B) -> LoanService<S, B> {
        LoanService {
            store: self.store,
            authorizer,
            events: self.events,
            auto_offset: self.auto_offset,
        }
    }

    /// Nets new loans against open loans running the other way
    pub fn with_auto_offset(mut self, enabled: bool) -> Self {
        self.auto_offset = enabled;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, A> LoanService<S, A>
where
    S: LoanStore,
    S::Tx: LoanTx,
    A: Authorizer,
{
    fn authorize(&self, ctx: &RequestContext, capability: Capability) -> Result<(), LoanError> {
        self.authorizer.check(ctx.actor(), capability).map_err(|denied| {
            warn!(error = %denied, "Loan operation denied");
            LoanError::from(denied)
        })
    }

    /// Records a new loan.
    ///
    /// With auto offset enabled, open loans from the borrower to the lender
    /// are netted against it oldest first in the same unit of work.
    #[instrument(skip(self, ctx, new), fields(lender_id = %new.lender_id, borrower_id = %new.borrower_id, principal = %new.principal))]
    pub async fn create_loan(&self, ctx: &RequestContext, new: NewLoan) -> Result<CreatedLoan, LoanError> {
        self.authorize(ctx, Capability::ManageLoans)?;

        let created = ctx
            .run("create_loan", async move {
                let loan = Loan::create(new)?;
                let mut tx = self.store.begin().await?;
                tx.insert_loan(&loan).await?;

                let mut current = LoanWithBalance::new(loan, Money::zero());
                let mut offsets = Vec::new();
                if self.auto_offset {
                    let reverse = tx
                        .lock_open_loans(current.loan.borrower_id, current.loan.lender_id)
                        .await?;
                    for other in reverse {
                        if !current.loan.is_open() {
                            break;
                        }
                        let other_paid = tx.paid_total(other.id).await?;
                        let other = LoanWithBalance::new(other, other_paid);
                        let compensation = net_loans(&mut tx, current, other).await?;
                        current = compensation.loan_a.clone();
                        offsets.push(compensation);
                    }
                }

                tx.commit().await?;
                Ok::<_, LoanError>(CreatedLoan {
                    loan: current,
                    offsets,
                })
            })
            .await?;

        let loan = &created.loan.loan;
        info!(loan_id = %loan.id, offsets = created.offsets.len(), "Loan created");
        self.events.publish(LedgerEvent::LoanCreated {
            loan_id: loan.id,
            lender_id: loan.lender_id,
            borrower_id: loan.borrower_id,
            principal: loan.principal,
            timestamp: loan.created_at,
        });
        for compensation in &created.offsets {
            self.publish_compensation(compensation);
        }
        Ok(created)
    }

    /// Records a repayment, settling the loan when it is paid off exactly
    ///
    /// # Arguments
    ///
    /// * `ctx` - Request context; the actor needs `ManageLoans`
    /// * `new` - Loan, amount, optional `paid_at` and note
    ///
    /// # Errors
    ///
    /// `LoanOverpayment` when the amount exceeds what is outstanding, with
    /// nothing written; `InvalidStateTransition` for a settled loan
    #[instrument(skip(self, ctx, new), fields(loan_id = %new.loan_id, amount = %new.amount))]
    pub async fn record_loan_payment(
        &self,
        ctx: &RequestContext,
        new: NewLoanPayment,
    ) -> Result<RecordedLoanPayment, LoanError> {
        self.authorize(ctx, Capability::ManageLoans)?;

        let recorded = ctx
            .run("record_loan_payment", async move {
                let mut tx = self.store.begin().await?;
                let mut loan = lock_loan(&mut tx, new.loan_id).await?;
                let paid = tx.paid_total(loan.id).await?;
                loan.apply_payment(paid, new.amount)?;

                let payment = LoanPayment::repayment(new);
                tx.insert_loan_payment(&payment).await?;
                if !loan.is_open() {
                    tx.update_loan(&loan).await?;
                }
                tx.commit().await?;

                let loan = LoanWithBalance::new(loan, paid + payment.amount);
                Ok::<_, LoanError>(RecordedLoanPayment { payment, loan })
            })
            .await?;

        info!(
            payment_id = %recorded.payment.id,
            outstanding = %recorded.loan.outstanding,
            "Loan payment recorded"
        );
        self.events.publish(LedgerEvent::LoanPaymentRecorded {
            loan_id: recorded.loan.loan.id,
            payment_id: recorded.payment.id,
            amount: recorded.payment.amount,
            outstanding: recorded.loan.outstanding,
            timestamp: recorded.payment.paid_at,
        });
        if !recorded.loan.loan.is_open() {
            self.events.publish(LedgerEvent::LoanSettled {
                loan_id: recorded.loan.loan.id,
                timestamp: recorded.payment.paid_at,
            });
        }
        Ok(recorded)
    }

    /// Nets two open loans between the same users running in opposite directions
    ///
    /// # Returns
    ///
    /// The offset (the smaller outstanding amount) and both loans after the
    /// compensation payments; at least one of them is settled
    #[instrument(skip(self, ctx), fields(loan_a = %loan_a, loan_b = %loan_b))]
    pub async fn compensate(
        &self,
        ctx: &RequestContext,
        loan_a: LoanId,
        loan_b: LoanId,
    ) -> Result<Compensation, LoanError> {
        self.authorize(ctx, Capability::ManageLoans)?;

        let compensation = ctx
            .run("compensate", async {
                let mut tx = self.store.begin().await?;
                // lock in id order so opposing calls cannot deadlock
                let (first, second) = if loan_a <= loan_b { (loan_a, loan_b) } else { (loan_b, loan_a) };
                let first = lock_loan(&mut tx, first).await?;
                let second = lock_loan(&mut tx, second).await?;
                let (a, b) = if first.id == loan_a { (first, second) } else { (second, first) };

                let a_paid = tx.paid_total(a.id).await?;
                let b_paid = tx.paid_total(b.id).await?;
                let compensation = net_loans(
                    &mut tx,
                    LoanWithBalance::new(a, a_paid),
                    LoanWithBalance::new(b, b_paid),
                )
                .await?;
                tx.commit().await?;
                Ok::<_, LoanError>(compensation)
            })
            .await?;

        info!(offset = %compensation.offset, "Loans compensated");
        self.publish_compensation(&compensation);
        Ok(compensation)
    }

    /// Nets debt chains that pass through a group.
    ///
    /// Where a member of a group owes an outsider who owes another member of
    /// the same group, both loans receive an equal compensation payment.
    /// Every open loan is locked in id order for the pass, and the whole
    /// pass commits or rolls back as one unit of work.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Request context carrying the actor and deadline
    /// * `groups` - Group membership of the household's users
    ///
    /// # Returns
    ///
    /// The compensations applied, oldest inbound loan first, and their total
    #[instrument(skip(self, ctx, groups))]
    pub async fn compensate_groups(
        &self,
        ctx: &RequestContext,
        groups: &GroupMembership,
    ) -> Result<GroupCompensation, LoanError> {
        self.authorize(ctx, Capability::ManageLoans)?;
        if groups.is_empty() {
            debug!("No groups configured, nothing to compensate");
            return Ok(GroupCompensation::default());
        }

        let result = ctx
            .run("compensate_groups", async {
                let mut tx = self.store.begin().await?;
                let mut current = BTreeMap::new();
                for loan in tx.lock_all_open_loans().await? {
                    let paid = tx.paid_total(loan.id).await?;
                    current.insert(loan.id, LoanWithBalance::new(loan, paid));
                }

                let snapshot: Vec<LoanWithBalance> = current.values().cloned().collect();
                let plan = plan_group_compensation(&snapshot, groups);

                let mut result = GroupCompensation::default();
                for step in plan {
                    let inbound = take_loan(&mut current, step.inbound)?;
                    let outbound = take_loan(&mut current, step.outbound)?;
                    let compensation = apply_offset(&mut tx, inbound, outbound, step.amount).await?;
                    current.insert(step.inbound, compensation.loan_a.clone());
                    current.insert(step.outbound, compensation.loan_b.clone());
                    result.total = result.total + step.amount;
                    result.compensations.push(compensation);
                }

                tx.commit().await?;
                Ok::<_, LoanError>(result)
            })
            .await?;

        info!(
            compensations = result.compensations.len(),
            total = %result.total,
            "Group compensation complete"
        );
        for compensation in &result.compensations {
            self.publish_compensation(compensation);
        }
        Ok(result)
    }

    /// Signed amount `user_a` owes `user_b` over their open loans
    #[instrument(skip(self, ctx), fields(user_a = %user_a, user_b = %user_b))]
    pub async fn get_balance(
        &self,
        ctx: &RequestContext,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Money, LoanError> {
        ctx.run("get_balance", async {
            let loans = self.store.open_loans_between(user_a, user_b).await?;
            Ok::<_, LoanError>(pair_balance(user_a, user_b, &loans))
        })
        .await
    }

    /// Settle-up summary over every open loan
    #[instrument(skip(self, ctx))]
    pub async fn get_all_balances(&self, ctx: &RequestContext) -> Result<SettleUp, LoanError> {
        ctx.run("get_all_balances", async {
            let loans = self.store.open_loans().await?;
            debug!(open_loans = loans.len(), "Computing settle-up");
            Ok::<_, LoanError>(settle_up(&loans))
        })
        .await
    }

    /// Loans matching `filter` with their derived balances, oldest first
    #[instrument(skip(self, ctx))]
    pub async fn list_loans(
        &self,
        ctx: &RequestContext,
        filter: &LoanFilter,
    ) -> Result<Vec<LoanWithBalance>, LoanError> {
        ctx.run("list_loans", async {
            Ok::<_, LoanError>(self.store.list_loans(filter).await?)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(loan_id = %loan_id))]
    pub async fn get_loan(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<LoanWithBalance, LoanError> {
        ctx.run("get_loan", async {
            self.store
                .find_loan(loan_id)
                .await?
                .ok_or_else(|| LoanError::loan_not_found(loan_id))
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(loan_id = %loan_id))]
    pub async fn loan_payments(
        &self,
        ctx: &RequestContext,
        loan_id: LoanId,
    ) -> Result<Vec<LoanPayment>, LoanError> {
        ctx.run("loan_payments", async {
            Ok::<_, LoanError>(self.store.list_loan_payments(loan_id).await?)
        })
        .await
    }

    /// Removes a loan and its payments; administrative only
    #[instrument(skip(self, ctx), fields(loan_id = %loan_id))]
    pub async fn delete_loan(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<(), LoanError> {
        self.authorize(ctx, Capability::ManageLoans)?;
        self.authorize(ctx, Capability::AdministrativeOverride)?;

        ctx.run("delete_loan", async {
            let mut tx = self.store.begin().await?;
            lock_loan(&mut tx, loan_id).await?;
            tx.delete_loan(loan_id).await?;
            tx.commit().await?;
            Ok::<_, LoanError>(())
        })
        .await?;

        warn!("Loan deleted");
        self.events.publish(LedgerEvent::LoanDeleted {
            loan_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn publish_compensation(&self, compensation: &Compensation) {
        self.events.publish(LedgerEvent::LoansCompensated {
            loan_a: compensation.loan_a.loan.id,
            loan_b: compensation.loan_b.loan.id,
            offset: compensation.offset,
            timestamp: Utc::now(),
        });
        for loan_id in compensation.settled() {
            self.events.publish(LedgerEvent::LoanSettled {
                loan_id,
                timestamp: Utc::now(),
            });
        }
    }
}

async fn lock_loan<T: LoanTx>(tx: &mut T, loan_id: LoanId) -> Result<Loan, LoanError> {
    tx.lock_loan(loan_id)
        .await?
        .ok_or_else(|| LoanError::loan_not_found(loan_id))
}

fn take_loan(
    loans: &mut BTreeMap<LoanId, LoanWithBalance>,
    loan_id: LoanId,
) -> Result<LoanWithBalance, LoanError> {
    loans.remove(&loan_id).ok_or_else(|| LoanError::loan_not_found(loan_id))
}

/// Writes a compensation payment pair for two opposing locked loans
async fn net_loans<T: LoanTx>(
    tx: &mut T,
    a: LoanWithBalance,
    b: LoanWithBalance,
) -> Result<Compensation, LoanError> {
    let offset = compensation_offset(&a.loan, a.outstanding, &b.loan, b.outstanding)?;
    apply_offset(tx, a, b, offset).await
}

/// Records `offset` as a compensation payment on both loans
async fn apply_offset<T: LoanTx>(
    tx: &mut T,
    mut a: LoanWithBalance,
    mut b: LoanWithBalance,
    offset: Money,
) -> Result<Compensation, LoanError> {
    let (a_id, b_id) = (a.loan.id, b.loan.id);
    for (this, other) in [(&mut a, b_id), (&mut b, a_id)] {
        this.loan.apply_payment(this.paid, offset)?;
        let payment = LoanPayment::compensation(this.loan.id, offset, other);
        tx.insert_loan_payment(&payment).await?;
        if !this.loan.is_open() {
            tx.update_loan(&this.loan).await?;
        }
        *this = LoanWithBalance::new(this.loan.clone(), this.paid + offset);
    }

    Ok(Compensation {
        offset,
        loan_a: a,
        loan_b: b,
    })
}
