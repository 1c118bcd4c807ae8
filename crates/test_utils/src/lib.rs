//! Test Utilities Crate
//!
//! Shared test infrastructure for the household ledger test suites.
//!
//! # Modules
//!
//! - `fixtures`: A fixed household, dates and amounts
//! - `builders`: Builders for bills, loans and recurring templates
//! - `database`: PostgreSQL testcontainer helpers and the `db_test!` macro
//! - `assertions`: Assertion helpers for allocations, payments and events
//! - `generators`: Property-based test data generators
//! - `events`: An event sink that records what services publish

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;
pub mod events;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
pub use events::*;
