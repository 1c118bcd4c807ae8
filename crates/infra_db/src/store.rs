//! PostgreSQL ledger store
//!
//! One pool-backed store implements both domains' storage ports. Reads run
//! straight on the pool; writes run on a [`PgTx`] that wraps a single
//! PostgreSQL transaction. Row locks are taken with `SELECT ... FOR UPDATE`
//! so concurrent writers to the same bill or loan serialize, and a lock
//! wait that exceeds `lock_timeout` surfaces as a conflict.

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::debug;

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, StoreError, Transactional, UnitOfWork};

use crate::error::db_to_store_error;
use crate::pool::DatabasePool;

const ADAPTER_ID: &str = "postgres-ledger-store";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// PostgreSQL-backed billing and loan store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pub(crate) pool: DatabasePool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a unit of work waits for a row lock before giving up
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

impl DomainPort for PgLedgerStore {}

/// An open PostgreSQL transaction
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls back.
#[derive(Debug)]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    pub(crate) fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_to_store_error)
    }
}

#[async_trait]
impl Transactional for PgLedgerStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_to_store_error)?;

        // SET does not accept bind parameters
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(db_to_store_error)?;

        debug!("Opened ledger transaction");
        Ok(PgTx { tx })
    }
}

#[async_trait]
impl HealthCheckable for PgLedgerStore {
    /// Runs `SELECT 1` against the pool
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(ADAPTER_ID, latency_ms, format!("Database error: {}", e)),
        }
    }
}
