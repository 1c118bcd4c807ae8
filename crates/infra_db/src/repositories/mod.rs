//! PostgreSQL implementations of the domain storage ports
//!
//! Each module owns the SQL and row mapping for one domain's tables and
//! implements that domain's read port on [`PgLedgerStore`](crate::PgLedgerStore)
//! and write port on [`PgTx`](crate::PgTx).

pub mod billing;
pub mod loans;
