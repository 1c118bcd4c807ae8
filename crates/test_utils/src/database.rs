//! PostgreSQL testcontainer helpers
//!
//! Each [`TestDatabase`] owns a throwaway `postgres:16-alpine` container with
//! the ledger migrations applied through the same path production uses.
//! Tests built on it need Docker and are marked `#[ignore]`.

use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use infra_db::{create_pool, run_migrations, DatabaseConfig, DatabasePool, PgLedgerStore};

const POSTGRES_IMAGE: &str = "postgres";
const POSTGRES_TAG: &str = "16-alpine";
const POSTGRES_USER: &str = "ledger_test";
const POSTGRES_PASSWORD: &str = "ledger_test";
const POSTGRES_DB: &str = "household_ledger_test";

/// Tables in child-first order
const LEDGER_TABLES: [&str; 8] = [
    "loan_payments",
    "loans",
    "payments",
    "allocations",
    "consumptions",
    "bills",
    "participants",
    "recurring_templates",
];

pub type TestDbError = Box<dyn std::error::Error + Send + Sync>;

fn connection_url(host: &str, port: u16) -> String {
    format!(
        "postgres://{}:{}@{}:{}/{}",
        POSTGRES_USER, POSTGRES_PASSWORD, host, port, POSTGRES_DB
    )
}

/// A migrated ledger database in its own container
pub struct TestDatabase {
    _container: ContainerAsync<GenericImage>,
    pub url: String,
    pub pool: DatabasePool,
}

impl TestDatabase {
    /// Starts a container and applies the migrations
    pub async fn start() -> Result<Self, TestDbError> {
        let container = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
            .with_exposed_port(5432.tcp())
            .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"))
            .with_env_var("POSTGRES_USER", POSTGRES_USER)
            .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
            .with_env_var("POSTGRES_DB", POSTGRES_DB)
            .start()
            .await?;

        let port = container.get_host_port_ipv4(5432).await?;
        let host = container.get_host().await?.to_string();
        let url = connection_url(&host, port);

        let pool = create_pool(
            DatabaseConfig::new(url.clone())
                .max_connections(5)
                .min_connections(1)
                .application_name("ledger-tests"),
        )
        .await?;
        run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            url,
            pool,
        })
    }

    /// A store with a short lock timeout so contention tests fail fast
    pub fn store(&self) -> PgLedgerStore {
        PgLedgerStore::new(self.pool.clone()).with_lock_timeout(Duration::from_millis(500))
    }

    /// Empties every ledger table, keeping the schema
    pub async fn clear_data(&self) -> Result<(), TestDbError> {
        sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", LEDGER_TABLES.join(", ")))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Declares an ignored test that runs against its own PostgreSQL container
///
/// ```rust,ignore
/// db_test!(test_bill_round_trip, |store| {
///     let bill = BillingService::new(store, sink).create_bill(&ctx, new_bill).await.unwrap();
/// });
/// ```
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$store:ident| $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        #[ignore = "requires Docker"]
        async fn $name() {
            let db = $crate::database::TestDatabase::start()
                .await
                .expect("Failed to start test database");
            let $store = db.store();
            $body
        }
    };
}
