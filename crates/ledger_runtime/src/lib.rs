//! Ledger Runtime - process wiring for the household ledger
//!
//! - `config`: layered configuration (defaults, `ledger.toml`, `LEDGER_*` env)
//! - `telemetry`: tracing subscriber setup
//! - `bootstrap`: builds the billing and loan services over one store
//! - `maintenance`: recurring bill generation, group compensation and the
//!   settle-up report
//!
//! # Example
//!
//! ```rust,ignore
//! let config = LedgerConfig::load()?;
//! init_tracing(&config.logging)?;
//! let (ledger, events) = connect(&config).await?;
//! let report = ledger.run_maintenance(today).await?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod maintenance;
pub mod telemetry;

pub use bootstrap::{connect, spawn_event_logger, BootstrapError, Ledger};
pub use config::{ConfigError, DatabaseSettings, LedgerConfig, LoggingSettings};
pub use maintenance::{membership_from, GeneratedBill, MaintenanceError, MaintenanceReport};
pub use telemetry::init_tracing;
