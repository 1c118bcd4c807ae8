//! Composition root
//!
//! Wires one store into both services with the process settings and an
//! event sink. [`connect`] does the PostgreSQL variant end to end.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use core_kernel::{
    ChannelEventSink, EventSink, HealthCheckResult, HealthCheckable, LedgerEvent, LedgerSettings,
    RequestContext, TracingEventSink,
};
use domain_billing::BillingService;
use domain_loans::LoanService;
use infra_db::{create_pool, run_migrations, DatabaseError, PgLedgerStore};

use crate::config::LedgerConfig;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Both ledger services over a shared store
pub struct Ledger<S> {
    pub billing: BillingService<S>,
    pub loans: LoanService<S>,
    store: S,
    settings: LedgerSettings,
}

impl<S: Clone> Ledger<S> {
    pub fn new(store: S, settings: LedgerSettings, events: Arc<dyn EventSink>) -> Self {
        Self {
            billing: BillingService::new(store.clone(), Arc::clone(&events)),
            loans: LoanService::new(store.clone(), events)
                .with_auto_offset(settings.auto_offset_reverse_loans),
            store,
            settings,
        }
    }
}

impl<S> Ledger<S> {
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A request context with the configured deadline
    pub fn request(&self) -> RequestContext {
        self.settings.request()
    }
}

impl<S: HealthCheckable> Ledger<S> {
    pub async fn health(&self) -> HealthCheckResult {
        self.store.health_check().await
    }
}

/// Connects to PostgreSQL, applies pending migrations and builds the ledger.
///
/// Events go into a channel sized by `ledger.event_buffer`; the receiver is
/// returned for the caller to drain, e.g. with [`spawn_event_logger`].
pub async fn connect(
    config: &LedgerConfig,
) -> Result<(Ledger<PgLedgerStore>, mpsc::Receiver<LedgerEvent>), BootstrapError> {
    let pool = create_pool(config.database.pool_config()).await?;
    run_migrations(&pool).await?;

    let (sink, receiver) = ChannelEventSink::bounded(config.ledger.event_buffer);
    let ledger = Ledger::new(PgLedgerStore::new(pool), config.ledger.clone(), Arc::new(sink));
    info!(
        auto_offset = config.ledger.auto_offset_reverse_loans,
        operation_timeout_ms = config.ledger.operation_timeout_ms,
        "Ledger ready"
    );
    Ok((ledger, receiver))
}

/// Drains `receiver` into the log until every sender is gone.
///
/// The task resolves to the number of events it logged.
pub fn spawn_event_logger(mut receiver: mpsc::Receiver<LedgerEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut logged = 0;
        while let Some(event) = receiver.recv().await {
            TracingEventSink.publish(event);
            logged += 1;
        }
        logged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{AdapterHealth, NoopEventSink};
    use infra_db::MemoryStore;

    #[tokio::test]
    async fn test_settings_reach_loan_service() {
        let settings = LedgerSettings {
            auto_offset_reverse_loans: true,
            operation_timeout_ms: 250,
            ..LedgerSettings::default()
        };
        let ledger = Ledger::new(MemoryStore::new(), settings, Arc::new(NoopEventSink));

        assert!(ledger.settings().auto_offset_reverse_loans);
        assert_eq!(ledger.request().timeout().as_millis(), 250);
        assert_eq!(ledger.health().await.status, AdapterHealth::Healthy);
    }

    #[tokio::test]
    async fn test_event_logger_counts_until_closed() {
        let (sink, receiver) = ChannelEventSink::bounded(4);
        let handle = spawn_event_logger(receiver);
        sink.publish(LedgerEvent::BillDeleted {
            bill_id: core_kernel::BillId::new(),
            administrative_override: false,
            timestamp: chrono::Utc::now(),
        });
        drop(sink);
        assert_eq!(handle.await.unwrap(), 1);
    }
}
