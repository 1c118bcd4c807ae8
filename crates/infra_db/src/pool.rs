//! Database connection pool management
//!
//! Pool configuration, creation and schema migrations for PostgreSQL.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::DatabaseError;

/// Type alias for the PostgreSQL connection pool
pub type DatabasePool = PgPool;

const DEFAULT_URL: &str = "postgres://localhost/household_ledger";
const DEFAULT_APPLICATION_NAME: &str = "household-ledger";

/// Configuration options for the database connection pool
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use infra_db::DatabaseConfig;
///
/// let config = DatabaseConfig::new("postgres://localhost/household_ledger")
///     .max_connections(20)
///     .min_connections(5)
///     .connect_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long to wait for a pooled connection
    pub connect_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    /// Reported in `pg_stat_activity`, handy when chasing lock waits
    pub application_name: String,
}

impl DatabaseConfig {
    /// Configuration for `url` with the ledger's pool defaults
    ///
    /// # Arguments
    ///
    /// * `url` - PostgreSQL connection string, e.g. `postgres://ledger@localhost/household_ledger`
    ///
    /// # Returns
    ///
    /// A config with 2 to 10 connections, a 30 second acquire timeout and
    /// the `household-ledger` application name
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }

    /// Caps the pool size
    ///
    /// # Arguments
    ///
    /// * `max` - Upper bound on open connections (default 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Connections kept open while idle
    ///
    /// # Arguments
    ///
    /// * `min` - Lower bound on open connections (default 2)
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// How long an acquire may wait before failing
    ///
    /// # Arguments
    ///
    /// * `timeout` - Acquire deadline (default 30s)
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Name reported to the server for each connection
    ///
    /// # Arguments
    ///
    /// * `name` - Shown as `application_name` in `pg_stat_activity`
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    fn connect_options(&self) -> Result<PgConnectOptions, DatabaseError> {
        let options = PgConnectOptions::from_str(&self.url)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("invalid database url: {}", e)))?;
        Ok(options.application_name(&self.application_name))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

/// Opens a pool for the ledger store
///
/// # Errors
///
/// Returns `DatabaseError::ConnectionFailed` if the URL does not parse or
/// no connection can be established
pub async fn create_pool(config: DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    let options = config.connect_options()?;
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        application_name = %config.application_name,
        "Creating ledger database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    Ok(pool)
}

/// Applies the embedded schema migrations
///
/// Migrations already recorded in `_sqlx_migrations` are skipped, so this
/// is safe to call on every start.
///
/// # Errors
///
/// Returns `DatabaseError::MigrationFailed` if a migration fails or a
/// recorded checksum no longer matches its file
pub async fn run_migrations(pool: &DatabasePool) -> Result<(), DatabaseError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

    info!("Database migrations applied");
    Ok(())
}
