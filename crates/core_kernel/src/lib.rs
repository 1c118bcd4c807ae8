//! Core Kernel - Foundational types for the household ledger
//!
//! This crate provides the building blocks shared by the billing and loan domains:
//! - Money and quantity types with banker's rounding at fixed precision
//! - Strongly-typed identifiers
//! - The storage port contract and unit-of-work traits
//! - Request context (deadline, cancellation, actor) and ledger settings
//! - Capability checks and domain events

pub mod auth;
pub mod context;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod money;
pub mod ports;

pub use auth::{AccessDenied, AllowAll, Authorizer, Capability, RoleAuthorizer};
pub use context::{LedgerSettings, RequestContext};
pub use error::CoreError;
pub use events::{ChannelEventSink, EventSink, LedgerEvent, NoopEventSink, TracingEventSink};
pub use identifiers::{
    AllocationId, BillId, ConsumptionId, GroupId, LoanId, LoanPaymentId, PaymentId,
    RecurringTemplateId, UserId,
};
pub use money::{round_half_even, Money, MoneyError, Quantity, CURRENCY_PRECISION, QUANTITY_PRECISION};
pub use ports::{
    AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, StoreError, Transactional,
    UnitOfWork,
};
