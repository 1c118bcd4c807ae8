//! Ledger domain events and outbound sinks
//!
//! Services publish an event only after its unit of work has committed.
//! Publishing is fire-and-forget: a sink that cannot deliver drops the event
//! and logs it, and the committed write stands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::identifiers::{
    BillId, ConsumptionId, LoanId, LoanPaymentId, PaymentId, RecurringTemplateId, UserId,
};
use crate::money::{Money, Quantity};

/// Events emitted by the billing and loan services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    #[serde(rename = "bill.created")]
    BillCreated {
        bill_id: BillId,
        total_amount: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "bill.updated")]
    BillUpdated {
        bill_id: BillId,
        total_amount: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "bill.posted")]
    BillPosted {
        bill_id: BillId,
        total_amount: Money,
        allocation_count: usize,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "bill.closed")]
    BillClosed {
        bill_id: BillId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "bill.reopened")]
    BillReopened {
        bill_id: BillId,
        recomputed: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "bill.deleted")]
    BillDeleted {
        bill_id: BillId,
        administrative_override: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "consumption.recorded")]
    ConsumptionRecorded {
        bill_id: BillId,
        consumption_id: ConsumptionId,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "consumption.invalidated")]
    ConsumptionInvalidated {
        bill_id: BillId,
        consumption_id: ConsumptionId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "payment.recorded")]
    PaymentRecorded {
        bill_id: BillId,
        payment_id: PaymentId,
        payer_id: UserId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "loan.created")]
    LoanCreated {
        loan_id: LoanId,
        lender_id: UserId,
        borrower_id: UserId,
        principal: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "loan.payment_recorded")]
    LoanPaymentRecorded {
        loan_id: LoanId,
        payment_id: LoanPaymentId,
        amount: Money,
        outstanding: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "loan.settled")]
    LoanSettled {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "loans.compensated")]
    LoansCompensated {
        loan_a: LoanId,
        loan_b: LoanId,
        offset: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "loan.deleted")]
    LoanDeleted {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "template.created")]
    TemplateCreated {
        template_id: RecurringTemplateId,
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Dotted event name used on the external bus
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BillCreated { .. } => "bill.created",
            LedgerEvent::BillUpdated { .. } => "bill.updated",
            LedgerEvent::BillPosted { .. } => "bill.posted",
            LedgerEvent::BillClosed { .. } => "bill.closed",
            LedgerEvent::BillReopened { .. } => "bill.reopened",
            LedgerEvent::BillDeleted { .. } => "bill.deleted",
            LedgerEvent::ConsumptionRecorded { .. } => "consumption.recorded",
            LedgerEvent::ConsumptionInvalidated { .. } => "consumption.invalidated",
            LedgerEvent::PaymentRecorded { .. } => "payment.recorded",
            LedgerEvent::LoanCreated { .. } => "loan.created",
            LedgerEvent::LoanPaymentRecorded { .. } => "loan.payment_recorded",
            LedgerEvent::LoanSettled { .. } => "loan.settled",
            LedgerEvent::LoansCompensated { .. } => "loans.compensated",
            LedgerEvent::LoanDeleted { .. } => "loan.deleted",
            LedgerEvent::TemplateCreated { .. } => "template.created",
        }
    }
}

/// Destination for committed ledger events
///
/// `publish` must not block and cannot fail from the caller's point of view.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: LedgerEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: LedgerEvent) {}
}

/// Writes each event as a structured log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: LedgerEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.name(), %payload, "ledger event"),
            Err(e) => warn!(event = event.name(), error = %e, "ledger event not serializable"),
        }
    }
}

/// Forwards events into a bounded channel drained by a bus publisher
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<LedgerEvent>,
}

impl ChannelEventSink {
    /// Creates the sink and the receiving half for the publisher task
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: LedgerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = event.name(), "event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event = event.name(), "event channel closed, dropping event");
            }
        }
    }
}
