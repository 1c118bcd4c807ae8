//! Recurring template operations on [`BillingService`]

use chrono::NaiveDate;
use tracing::{info, instrument, warn};

use core_kernel::{
    Authorizer, Capability, LedgerEvent, RecurringTemplateId, RequestContext, UnitOfWork,
};

use crate::bill::Bill;
use crate::error::BillingError;
use crate::ports::{BillingStore, BillingTx};
use crate::recurring::{NewTemplate, RecurringTemplate};
use crate::service::BillingService;

impl<S, A> BillingService<S, A>
where
    S: BillingStore,
    S::Tx: BillingTx,
    A: Authorizer,
{
    #[instrument(skip(self, ctx, new), fields(name = %new.name, frequency = %new.frequency))]
    pub async fn create_template(
        &self,
        ctx: &RequestContext,
        new: NewTemplate,
    ) -> Result<RecurringTemplate, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let template = ctx
            .run("create_template", async move {
                let template = RecurringTemplate::create(new)?;
                let mut tx = self.store.begin().await?;
                tx.insert_template(&template).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(template)
            })
            .await?;

        info!(
            template_id = %template.id,
            next_due_date = %template.next_due_date,
            "Recurring template created"
        );
        self.events.publish(LedgerEvent::TemplateCreated {
            template_id: template.id,
            timestamp: template.created_at,
        });
        Ok(template)
    }

    /// Stops a template from generating further bills
    #[instrument(skip(self, ctx), fields(template_id = %template_id))]
    pub async fn deactivate_template(
        &self,
        ctx: &RequestContext,
        template_id: RecurringTemplateId,
    ) -> Result<RecurringTemplate, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let template = ctx
            .run("deactivate_template", async {
                let mut tx = self.store.begin().await?;
                let mut template = lock_template(&mut tx, template_id).await?;
                template.active = false;
                tx.update_template(&template).await?;
                tx.commit().await?;
                Ok::<_, BillingError>(template)
            })
            .await?;

        info!("Recurring template deactivated");
        Ok(template)
    }

    #[instrument(skip(self, ctx))]
    pub async fn templates(&self, ctx: &RequestContext) -> Result<Vec<RecurringTemplate>, BillingError> {
        ctx.run("templates", async {
            Ok::<_, BillingError>(self.store.list_templates().await?)
        })
        .await
    }

    /// Creates a draft bill for every due date up to `today`.
    ///
    /// Each template is handled in its own unit of work. A template that
    /// missed several periods produces one bill per missed period. A failure
    /// on one template is logged and does not stop the others; bills from
    /// the templates that succeeded stay committed and the first error is
    /// returned once every template has been tried.
    #[instrument(skip(self, ctx), fields(today = %today))]
    pub async fn generate_due_bills(
        &self,
        ctx: &RequestContext,
        today: NaiveDate,
    ) -> Result<Vec<Bill>, BillingError> {
        self.authorize(ctx, Capability::ManageBills)?;

        let due: Vec<RecurringTemplateId> = self
            .templates(ctx)
            .await?
            .into_iter()
            .filter(|t| t.is_due(today))
            .map(|t| t.id)
            .collect();

        let mut generated = Vec::new();
        let mut first_error = None;
        for template_id in due {
            match self.generate_for_template(ctx, template_id, today).await {
                Ok(bills) => generated.extend(bills),
                Err(error) => {
                    warn!(template_id = %template_id, error = %error, "Recurring bill generation failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        for bill in &generated {
            self.events.publish(LedgerEvent::BillCreated {
                bill_id: bill.id,
                total_amount: bill.total_amount,
                timestamp: bill.created_at,
            });
        }
        info!(count = generated.len(), "Recurring bills generated");

        match first_error {
            Some(error) => Err(error),
            None => Ok(generated),
        }
    }

    async fn generate_for_template(
        &self,
        ctx: &RequestContext,
        template_id: RecurringTemplateId,
        today: NaiveDate,
    ) -> Result<Vec<Bill>, BillingError> {
        ctx.run("generate_due_bills", async {
            let mut tx = self.store.begin().await?;
            // another run may have advanced the template since it was listed
            let mut template = lock_template(&mut tx, template_id).await?;

            let mut bills = Vec::new();
            while template.is_due(today) {
                let bill = Bill::create(template.draft_bill()?)?;
                tx.insert_bill(&bill).await?;
                bills.push(bill);
                template.advance()?;
            }
            tx.update_template(&template).await?;
            tx.commit().await?;
            Ok::<_, BillingError>(bills)
        })
        .await
    }
}

async fn lock_template<T: BillingTx>(
    tx: &mut T,
    template_id: RecurringTemplateId,
) -> Result<RecurringTemplate, BillingError> {
    tx.lock_template(template_id)
        .await?
        .ok_or_else(|| BillingError::not_found("recurring template", template_id))
}

/// Number of bills a template would generate between its next due date and `today`
pub fn pending_occurrences(template: &RecurringTemplate, today: NaiveDate) -> Result<usize, BillingError> {
    let mut probe = template.clone();
    let mut count = 0;
    while probe.is_due(today) {
        count += 1;
        probe.advance()?;
    }
    Ok(count)
}
