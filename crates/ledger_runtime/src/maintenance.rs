//! Periodic maintenance: recurring bill generation and the settle-up report

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument};

use core_kernel::{BillId, Money, Transactional};
use domain_billing::{Bill, BillingError, BillingStore, BillingTx, Participant, Subject};
use domain_loans::{GroupCompensation, GroupMembership, LoanError, LoanStore, LoanTx, SettleUp};

use crate::bootstrap::Ledger;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Loans(#[from] LoanError),
}

/// A draft bill produced from a recurring template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedBill {
    pub bill_id: BillId,
    pub name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub amount: Money,
    pub payment_deadline: Option<NaiveDate>,
}

impl From<&Bill> for GeneratedBill {
    fn from(bill: &Bill) -> Self {
        Self {
            bill_id: bill.id,
            name: bill.display_name().to_string(),
            period_start: bill.period_start,
            period_end: bill.period_end,
            amount: bill.total_amount,
            payment_deadline: bill.payment_deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub run_date: NaiveDate,
    pub generated: Vec<GeneratedBill>,
    pub settle_up: SettleUp,
}

impl fmt::Display for MaintenanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Maintenance run for {}", self.run_date)?;
        writeln!(f, "Generated bills: {}", self.generated.len())?;
        for bill in &self.generated {
            writeln!(
                f,
                "  {} {} {}..{} {}",
                bill.bill_id, bill.name, bill.period_start, bill.period_end, bill.amount
            )?;
        }
        if self.settle_up.balances.is_empty() {
            return writeln!(f, "All loans settled");
        }
        writeln!(f, "Outstanding between users:")?;
        for pair in &self.settle_up.balances {
            writeln!(f, "  {} owes {} {}", pair.debtor, pair.creditor, pair.amount)?;
        }
        writeln!(f, "Net positions:")?;
        for position in &self.settle_up.positions {
            writeln!(
                f,
                "  {} owes {} is owed {} net {}",
                position.user, position.owes, position.owed, position.net
            )?;
        }
        Ok(())
    }
}

/// Group membership taken from the active group participants
pub fn membership_from(participants: &[Participant]) -> GroupMembership {
    participants
        .iter()
        .filter(|p| p.active)
        .fold(GroupMembership::new(), |membership, p| match p.subject {
            Subject::Group(group) => membership.with_group(group, p.members.iter().copied()),
            Subject::User(_) => membership,
        })
}

impl<S> Ledger<S>
where
    S: BillingStore + LoanStore,
    <S as Transactional>::Tx: BillingTx + LoanTx,
{
    /// Generates every recurring bill due by `today`, then summarises the
    /// open loans.
    ///
    /// Bills committed before a template failure stay committed; the error
    /// is returned without a report.
    #[instrument(skip(self), fields(today = %today))]
    pub async fn run_maintenance(&self, today: NaiveDate) -> Result<MaintenanceReport, MaintenanceError> {
        let ctx = self.request().with_correlation_id(format!("maintenance-{}", today));

        let generated = self.billing.generate_due_bills(&ctx, today).await?;
        let settle_up = self.loans.get_all_balances(&ctx).await?;

        info!(
            generated = generated.len(),
            open_pairs = settle_up.balances.len(),
            "Maintenance complete"
        );
        Ok(MaintenanceReport {
            run_date: today,
            generated: generated.iter().map(GeneratedBill::from).collect(),
            settle_up,
        })
    }

    /// Nets loan chains through the household's groups, using the billing
    /// participants as the source of group membership
    #[instrument(skip(self))]
    pub async fn compensate_groups(&self) -> Result<GroupCompensation, MaintenanceError> {
        let ctx = self.request().with_correlation_id("compensate-groups");
        let participants = self.billing.participants(&ctx).await?;
        let membership = membership_from(&participants);
        Ok(self.loans.compensate_groups(&ctx, &membership).await?)
    }
}
