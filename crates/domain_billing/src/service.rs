//! Billing service
//!
//! Orchestrates the bill lifecycle over a [`BillingStore`]. Every mutating
//! operation follows the same shape: check the caller's capability, open a
//! unit of work under the request's deadline, lock the bill row, apply the
//! domain transition, commit, and only then publish the event.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::{
    AllowAll, Authorizer, BillId, Capability, ConsumptionId, EventSink, LedgerEvent,
    RequestContext, UnitOfWork, UserId,
};

use crate::allocation::{plan_allocation, Allocation, AllocationPlan};
use crate::bill::{Bill, BillStatus, BillUpdate, DeleteMode, NewBill};
use crate::consumption::{Consumption, NewConsumption};
use crate::error::BillingError;
use crate::payment::{subject_statuses, NewPayment, Payment, PaymentStatus, SubjectPaymentStatus};
use crate::ports::{BillFilter, BillingStore, BillingTx};
use crate::subject::{Participant, Subject};

/// A bill together with the allocation rows written when it was posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedBill {
    pub bill: Bill,
    pub allocations: Vec<Allocation>,
}

/// Options for reopening a closed bill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReopenRequest {
    /// Recompute and replace the allocation set from current consumptions
    pub force_recompute: bool,
    pub reason: Option<String>,
}

impl ReopenRequest {
    pub fn keep_allocations() -> Self {
        Self::default()
    }

    pub fn recompute() -> Self {
        Self {
            force_recompute: true,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Bill, consumption, allocation and payment operations
pub struct BillingService<S, A = AllowAll> {
    pub(crate) store: S,
    pub(crate) authorizer: A,
    pub(crate) events: Arc<dyn EventSink>,
}

impl<S> BillingService<S, AllowAll> {
    pub fn new(store: S, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            authorizer: AllowAll,
            events,
        }
    }
}

impl<S, A> BillingService<S, A> {
    /// Replaces the authorizer consulted before every write
    pub fn with_authorizer<B: Authorizer>(self, authorizer: B) -> BillingService<S, B> {
        BillingService {
            store: self.store,
            authorizer,
            events: self.events,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, A> BillingService<S, A>
where
    S: BillingStore,
    S::Tx: BillingTx,
    A: Authorizer,
{
    pub(crate) fn authorize(
        &self,
        ctx: &RequestContext,
        capability: Capability,
    ) -> Result<(), BillingError> {
        self.authorizer.check(ctx.actor(), capability).map_err(|denied| {
            warn!(error = %denied, "Billing operation denied");
            BillingError::from(denied)
        })
    }

    // ------------------------------------------------------------------
    // Bills
    // ------------------------------------------------------------------

    /// Creates a bill in draft
    ///
    /// # Arguments
    ///
    /// * `ctx` - Request context; the actor needs `ManageBills`
    /// * `new` - Type, period, total and optional deadline and notes
    ///
    /// # Returns
    ///
    /// The stored draft. No allocations exist until it is posted.
    ///
    /// # Errors
    ///
    /// `Validation` for an inverted period or a non-positive total
    #[instrument(skip(self, ctx, new), fields(bill_type = %new.bill_type))]
    pub async fn create_bill(&self, ctx: &RequestContext, new: NewBill) -> Result<Bill, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let bill = ctx
            .run("create_bill", async move {
                let bill = Bill::create(new)?;
                let mut tx = self.store.begin().await?;
                tx.insert_bill(&bill).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(bill)
            })
            .await?;

        info!(bill_id = %bill.id, total = %bill.total_amount, "Bill created");
        self.events.publish(LedgerEvent::BillCreated {
            bill_id: bill.id,
            total_amount: bill.total_amount,
            timestamp: bill.created_at,
        });
        Ok(bill)
    }

    /// Edits the total, period, units, deadline or notes of a draft bill
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` once the bill has been posted
    #[instrument(skip(self, ctx, update), fields(bill_id = %bill_id))]
    pub async fn update_draft(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
        update: BillUpdate,
    ) -> Result<Bill, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let bill = ctx
            .run("update_draft", async move {
                let mut tx = self.store.begin().await?;
                let mut bill = lock_bill(&mut tx, bill_id).await?;
                bill.apply_update(update)?;
                tx.update_bill(&bill).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(bill)
            })
            .await?;

        info!(bill_id = %bill.id, "Draft bill updated");
        self.events.publish(LedgerEvent::BillUpdated {
            bill_id: bill.id,
            total_amount: bill.total_amount,
            timestamp: bill.updated_at,
        });
        Ok(bill)
    }

    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn get_bill(&self, ctx: &RequestContext, bill_id: BillId) -> Result<Bill, BillingError> {
        ctx.run("get_bill", self.load_bill(bill_id)).await
    }

    /// Bills matching `filter`, newest period first; empty when nothing matches
    #[instrument(skip(self, ctx))]
    pub async fn list_bills(
        &self,
        ctx: &RequestContext,
        filter: &BillFilter,
    ) -> Result<Vec<Bill>, BillingError> {
        ctx.run("list_bills", async {
            let bills = self.store.list_bills(filter).await?;
            debug!(count = bills.len(), "Listed bills");
            Ok::<_, BillingError>(bills)
        })
        .await
    }

    /// Removes a bill together with its consumptions, allocations and payments.
    ///
    /// Standard deletion only accepts drafts. The administrative override
    /// accepts any status and needs its own capability on top of
    /// [`Capability::ManageBills`].
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id, mode = ?mode))]
    pub async fn delete_bill(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
        mode: DeleteMode,
    ) -> Result<(), BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;
        if mode == DeleteMode::AdministrativeOverride {
            self.authorize(ctx, Capability::AdministrativeOverride)?;
        }

        let status = ctx
            .run("delete_bill", async {
                let mut tx = self.store.begin().await?;
                let bill = lock_bill(&mut tx, bill_id).await?;
                bill.ensure_deletable(mode)?;
                tx.delete_bill(bill_id).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(bill.status)
            })
            .await?;

        let administrative_override = mode == DeleteMode::AdministrativeOverride;
        if administrative_override && status != BillStatus::Draft {
            warn!(bill_id = %bill_id, status = %status, "Bill deleted under administrative override");
        } else {
            info!(bill_id = %bill_id, "Bill deleted");
        }
        self.events.publish(LedgerEvent::BillDeleted {
            bill_id,
            administrative_override,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumption
    // ------------------------------------------------------------------

    /// Records a usage figure against a draft bill.
    ///
    /// Meter readings are turned into a quantity relative to the subject's
    /// latest earlier valid reading on any bill.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Request context; the actor needs `ManageBills`
    /// * `new` - Bill, subject, and exactly one of an explicit quantity or a
    ///   meter value
    ///
    /// # Errors
    ///
    /// `Validation` for a non-positive quantity or a reading below the
    /// previous one; `InvalidStateTransition` if the bill is not a draft
    #[instrument(skip(self, ctx, new), fields(bill_id = %new.bill_id, subject = %new.subject))]
    pub async fn record_consumption(
        &self,
        ctx: &RequestContext,
        mut new: NewConsumption,
    ) -> Result<Consumption, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let consumption = ctx
            .run("record_consumption", async move {
                let recorded_at = *new.recorded_at.get_or_insert_with(Utc::now);
                let mut tx = self.store.begin().await?;
                let bill = lock_bill(&mut tx, new.bill_id).await?;
                bill.require_status(BillStatus::Draft, "record consumption for")?;

                let previous = match (new.quantity, new.meter_value) {
                    (None, Some(_)) => tx.previous_meter_reading(new.subject, recorded_at).await?,
                    _ => None,
                };
                let consumption = Consumption::record(new, previous)?;
                tx.insert_consumption(&consumption).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(consumption)
            })
            .await?;

        info!(
            consumption_id = %consumption.id,
            quantity = %consumption.quantity,
            "Consumption recorded"
        );
        self.events.publish(LedgerEvent::ConsumptionRecorded {
            bill_id: consumption.bill_id,
            consumption_id: consumption.id,
            quantity: consumption.quantity,
            timestamp: consumption.recorded_at,
        });
        Ok(consumption)
    }

    /// Excludes a consumption from future allocation runs without deleting it
    #[instrument(skip(self, ctx), fields(consumption_id = %consumption_id))]
    pub async fn invalidate_consumption(
        &self,
        ctx: &RequestContext,
        consumption_id: ConsumptionId,
    ) -> Result<Consumption, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let consumption = ctx
            .run("invalidate_consumption", async {
                let mut tx = self.store.begin().await?;
                let bill_id = find_consumption(&mut tx, consumption_id).await?.bill_id;
                let bill = lock_bill(&mut tx, bill_id).await?;
                bill.require_open("invalidate consumption of")?;

                // re-read under the bill lock
                let mut consumption = find_consumption(&mut tx, consumption_id).await?;
                consumption.invalidate()?;
                tx.update_consumption(&consumption).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(consumption)
            })
            .await?;

        info!(bill_id = %consumption.bill_id, "Consumption invalidated");
        self.events.publish(LedgerEvent::ConsumptionInvalidated {
            bill_id: consumption.bill_id,
            consumption_id,
            timestamp: Utc::now(),
        });
        Ok(consumption)
    }

    /// All consumptions of a bill, invalidated rows included
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn consumptions(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
    ) -> Result<Vec<Consumption>, BillingError> {
        ctx.run("consumptions", async {
            Ok::<_, BillingError>(self.store.list_consumptions(bill_id).await?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Allocation and lifecycle
    // ------------------------------------------------------------------

    /// Computes the split a draft bill would get if posted now
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn preview_allocation(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
    ) -> Result<AllocationPlan, BillingError> {
        ctx.run("preview_allocation", async {
            let bill = self.load_bill(bill_id).await?;
            bill.require_status(BillStatus::Draft, "preview allocation for")?;
            let consumptions = self.store.list_consumptions(bill_id).await?;
            let participants = self.store.list_participants().await?;
            plan_allocation(&bill, &consumptions, &participants)
        })
        .await
    }

    /// Posts a draft bill and writes its allocation set.
    ///
    /// The status change and the allocation rows commit together. Of two
    /// concurrent posts on the same bill the second one finds it no longer
    /// draft and fails with an invalid transition.
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn post_bill(&self, ctx: &RequestContext, bill_id: BillId) -> Result<PostedBill, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let posted = ctx
            .run("post_bill", async {
                let mut tx = self.store.begin().await?;
                let mut bill = lock_bill(&mut tx, bill_id).await?;
                bill.post()?;

                let allocations = allocate(&mut tx, &bill).await?;
                tx.update_bill(&bill).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(PostedBill { bill, allocations })
            })
            .await?;

        info!(
            bill_id = %bill_id,
            allocations = posted.allocations.len(),
            "Bill posted"
        );
        self.events.publish(LedgerEvent::BillPosted {
            bill_id,
            total_amount: posted.bill.total_amount,
            allocation_count: posted.allocations.len(),
            timestamp: posted.bill.updated_at,
        });
        Ok(posted)
    }

    /// Closes a posted bill, freezing its consumptions and allocations
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn close_bill(&self, ctx: &RequestContext, bill_id: BillId) -> Result<Bill, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let bill = ctx
            .run("close_bill", async {
                let mut tx = self.store.begin().await?;
                let mut bill = lock_bill(&mut tx, bill_id).await?;
                bill.close()?;
                tx.update_bill(&bill).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(bill)
            })
            .await?;

        info!(bill_id = %bill_id, "Bill closed");
        self.events.publish(LedgerEvent::BillClosed {
            bill_id,
            timestamp: bill.updated_at,
        });
        Ok(bill)
    }

    /// Returns a closed bill to posted.
    ///
    /// Existing allocations stay authoritative unless the request asks for
    /// recomputation, in which case they are replaced in the same unit of
    /// work as the status change.
    #[instrument(skip(self, ctx, request), fields(bill_id = %bill_id, force_recompute = request.force_recompute))]
    pub async fn reopen_bill(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
        request: ReopenRequest,
    ) -> Result<Bill, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;
        let recomputed = request.force_recompute;

        let bill = ctx
            .run("reopen_bill", async move {
                let mut tx = self.store.begin().await?;
                let mut bill = lock_bill(&mut tx, bill_id).await?;
                bill.reopen(request.reason)?;
                if request.force_recompute {
                    allocate(&mut tx, &bill).await?;
                }
                tx.update_bill(&bill).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(bill)
            })
            .await?;

        info!(bill_id = %bill_id, recomputed, "Bill reopened");
        self.events.publish(LedgerEvent::BillReopened {
            bill_id,
            recomputed,
            timestamp: bill.updated_at,
        });
        Ok(bill)
    }

    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn allocations(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
    ) -> Result<Vec<Allocation>, BillingError> {
        ctx.run("allocations", async {
            Ok::<_, BillingError>(self.store.list_allocations(bill_id).await?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Appends a payment to a posted or closed bill
    ///
    /// # Arguments
    ///
    /// * `ctx` - Request context; the actor needs `RecordPayments`
    /// * `new` - Payer, amount, optional `paid_at` (defaults to now) and note
    ///
    /// # Returns
    ///
    /// The stored payment. Overpayment is accepted and shows up as
    /// [`PaymentState::Overpaid`](crate::PaymentState::Overpaid) in the
    /// bill's status.
    #[instrument(skip(self, ctx, new), fields(bill_id = %new.bill_id, payer_id = %new.payer_id, amount = %new.amount))]
    pub async fn record_payment(
        &self,
        ctx: &RequestContext,
        new: NewPayment,
    ) -> Result<Payment, BillingError> {
        self.authorize(ctx, Capability::RecordPayments)?;

        let payment = ctx
            .run("record_payment", async move {
                let payment = Payment::record(new)?;
                let mut tx = self.store.begin().await?;
                let bill = lock_bill(&mut tx, payment.bill_id).await?;
                if !bill.accepts_payments() {
                    return Err(BillingError::invalid_transition(
                        "bill",
                        bill.id,
                        bill.status,
                        "record payments for",
                    ));
                }
                tx.insert_payment(&payment).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(payment)
            })
            .await?;

        info!(payment_id = %payment.id, "Payment recorded");
        self.events.publish(LedgerEvent::PaymentRecorded {
            bill_id: payment.bill_id,
            payment_id: payment.id,
            payer_id: payment.payer_id,
            amount: payment.amount,
            timestamp: payment.paid_at,
        });
        Ok(payment)
    }

    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn payments(&self, ctx: &RequestContext, bill_id: BillId) -> Result<Vec<Payment>, BillingError> {
        ctx.run("payments", async {
            Ok::<_, BillingError>(self.store.list_payments(bill_id).await?)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(payer_id = %payer))]
    pub async fn payments_by_payer(
        &self,
        ctx: &RequestContext,
        payer: UserId,
    ) -> Result<Vec<Payment>, BillingError> {
        ctx.run("payments_by_payer", async {
            Ok::<_, BillingError>(self.store.payments_by_payer(payer).await?)
        })
        .await
    }

    /// Paid/remaining figures derived from the payment rows on every call
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn payment_status(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
    ) -> Result<PaymentStatus, BillingError> {
        ctx.run("payment_status", async {
            let bill = self.load_bill(bill_id).await?;
            let payments = self.store.list_payments(bill_id).await?;
            Ok::<_, BillingError>(PaymentStatus::derive(&bill, &payments))
        })
        .await
    }

    /// Per-subject breakdown of a bill's allocations against its payments
    #[instrument(skip(self, ctx), fields(bill_id = %bill_id))]
    pub async fn subject_payment_status(
        &self,
        ctx: &RequestContext,
        bill_id: BillId,
    ) -> Result<Vec<SubjectPaymentStatus>, BillingError> {
        ctx.run("subject_payment_status", async {
            self.load_bill(bill_id).await?;
            let allocations = self.store.list_allocations(bill_id).await?;
            let payments = self.store.list_payments(bill_id).await?;
            let participants = self.store.list_participants().await?;
            Ok::<_, BillingError>(subject_statuses(&allocations, &payments, &participants))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    /// Adds a participant to the roster, or replaces its weight and members
    #[instrument(skip(self, ctx, participant), fields(subject = %participant.subject))]
    pub async fn set_participant(
        &self,
        ctx: &RequestContext,
        participant: Participant,
    ) -> Result<Participant, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;
        participant.validate()?;

        let participant = ctx
            .run("set_participant", async move {
                let mut tx = self.store.begin().await?;
                tx.upsert_participant(&participant).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(participant)
            })
            .await?;

        info!(weight = %participant.weight, active = participant.active, "Participant saved");
        Ok(participant)
    }

    /// Stops a participant receiving shares on bills posted from now on
    ///
    /// Allocations already written are left alone.
    #[instrument(skip(self, ctx), fields(subject = %subject))]
    pub async fn deactivate_participant(
        &self,
        ctx: &RequestContext,
        subject: Subject,
    ) -> Result<Participant, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let participant = ctx
            .run("deactivate_participant", async {
                let mut tx = self.store.begin().await?;
                let mut participant = tx
                    .active_participants()
                    .await?
                    .into_iter()
                    .find(|p| p.subject == subject)
                    .ok_or_else(|| BillingError::not_found("participant", subject))?;
                participant.active = false;
                tx.upsert_participant(&participant).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(participant)
            })
            .await?;

        info!("Participant deactivated");
        Ok(participant)
    }

    /// The full roster, inactive participants included
    #[instrument(skip(self, ctx))]
    pub async fn participants(&self, ctx: &RequestContext) -> Result<Vec<Participant>, BillingError> {
        ctx.run("participants", async {
            Ok::<_, BillingError>(self.store.list_participants().await?)
        })
        .await
    }

    async fn load_bill(&self, bill_id: BillId) -> Result<Bill, BillingError> {
        self.store
            .find_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::not_found("bill", bill_id))
    }
}

pub(crate) async fn lock_bill<T: BillingTx>(tx: &mut T, bill_id: BillId) -> Result<Bill, BillingError> {
    tx.lock_bill(bill_id)
        .await?
        .ok_or_else(|| BillingError::not_found("bill", bill_id))
}

async fn find_consumption<T: BillingTx>(
    tx: &mut T,
    consumption_id: ConsumptionId,
) -> Result<Consumption, BillingError> {
    tx.find_consumption(consumption_id)
        .await?
        .ok_or_else(|| BillingError::not_found("consumption", consumption_id))
}

/// Computes the bill's split from the rows visible to `tx` and replaces
/// whatever allocation set the bill had
async fn allocate<T: BillingTx>(tx: &mut T, bill: &Bill) -> Result<Vec<Allocation>, BillingError> {
    let consumptions = tx.consumptions(bill.id).await?;
    let participants = tx.active_participants().await?;
    let plan = plan_allocation(bill, &consumptions, &participants)?;
    debug!(basis = plan.basis.as_str(), lines = plan.lines.len(), "Allocation planned");

    let allocations = plan.into_allocations(bill.updated_at);
    tx.replace_allocations(bill.id, &allocations).await?;
    Ok(allocations)
}
