//! Ports and Adapters Infrastructure
//!
//! Storage contract shared by the billing and loan domains. Each domain
//! declares its own store trait on top of [`Transactional`]; adapters in
//! `infra_db` (PostgreSQL and in-memory) implement them.
//!
//! ```text
//!        BillingService / LoanService
//!                    │
//!                    ▼
//!     BillingStore + BillingTx / LoanStore + LoanTx
//!                    ▲
//!         ┌──────────┴──────────┐
//!   PgLedgerStore           MemoryStore
//! ```
//!
//! A unit of work begins with [`Transactional::begin`] and ends with
//! [`UnitOfWork::commit`]. Dropping a unit of work without committing it
//! rolls every write back, which is how cancellation and timeouts abort
//! without leaving partial rows behind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for store operations
///
/// Shared by every adapter so that domain services can classify failures
/// without knowing which backend produced them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// The transaction lost a serialization race or a lock wait
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// A constraint in the backing store rejected the write
    #[error("Constraint violated: {message}")]
    Constraint {
        message: String,
    },

    /// Connection to the backing store failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation exceeded the caller's deadline
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// The caller cancelled the operation
    #[error("Cancelled: {operation}")]
    Cancelled {
        operation: String,
    },

    /// A stored row could not be mapped back into a domain value
    #[error("Corrupt record: {message}")]
    Corrupt {
        message: String,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        StoreError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::Conflict {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        StoreError::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StoreError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if a caller-driven retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. }
                | StoreError::Connection { .. }
                | StoreError::Timeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Marker trait for all domain ports
///
/// All port traits extend this marker so they are thread-safe and can be
/// shared across request workers.
pub trait DomainPort: Send + Sync + 'static {}

/// An open unit of work against a store
///
/// Writes become visible to other workers only after `commit`.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(self) -> Result<(), StoreError>;
}

/// A store that can open units of work
#[async_trait]
pub trait Transactional: DomainPort {
    type Tx: UnitOfWork;

    /// Opens a unit of work
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Health status for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check result for an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Adapter identifier
    pub adapter_id: String,
    pub status: AdapterHealth,
    /// Latency of the health check in milliseconds
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthCheckResult {
    pub fn healthy(adapter_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Healthy,
            latency_ms,
            message: None,
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn unhealthy(adapter_id: impl Into<String>, latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Unhealthy,
            latency_ms,
            message: Some(message.into()),
            checked_at: chrono::Utc::now(),
        }
    }
}

/// Trait for adapters that support health checks
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}
