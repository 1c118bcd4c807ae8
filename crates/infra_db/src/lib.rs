//! Infrastructure Database Layer
//!
//! Storage adapters for the household ledger:
//!
//! - [`PgLedgerStore`]: PostgreSQL via SQLx, with row locks for writers
//! - [`MemoryStore`]: a process-local store with the same semantics, used
//!   by tests and local tooling
//!
//! Both implement the billing and loan storage ports declared in
//! `domain_billing` and `domain_loans`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PgLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/household_ledger")).await?;
//! run_migrations(&pool).await?;
//! let store = PgLedgerStore::new(pool);
//! ```

pub mod error;
pub mod memory;
pub mod pool;
pub mod repositories;
pub mod store;

pub use error::DatabaseError;
pub use memory::{MemoryStore, MemoryTx};
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
pub use store::{PgLedgerStore, PgTx};
