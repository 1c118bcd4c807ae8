//! Explicit per-request and per-process context
//!
//! [`LedgerSettings`] is built once at startup and handed to the services
//! that need it. [`RequestContext`] travels with every operation and carries
//! the caller's deadline, cancellation token, actor and correlation id.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::identifiers::UserId;
use crate::ports::StoreError;

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EVENT_BUFFER: usize = 1_024;

/// Process-wide ledger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Deadline applied to requests that do not bring their own
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Net a new loan against open loans in the opposite direction
    #[serde(default)]
    pub auto_offset_reverse_loans: bool,
    /// Capacity of the outbound event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            auto_offset_reverse_loans: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl LedgerSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.operation_timeout_ms == 0 {
            return Err(CoreError::configuration(
                "operation_timeout_ms must be greater than zero",
            ));
        }
        if self.event_buffer == 0 {
            return Err(CoreError::configuration("event_buffer must be greater than zero"));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Starts a request context using the configured default deadline
    pub fn request(&self) -> RequestContext {
        RequestContext::new(self.operation_timeout())
    }
}

/// Caller-supplied context for a single ledger operation
///
/// # Example
///
/// ```rust,ignore
/// let ctx = RequestContext::new(Duration::from_secs(2)).with_actor(user_id);
/// let posted = billing.post_bill(&ctx, bill_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    timeout: Duration,
    cancellation: CancellationToken,
    actor: Option<UserId>,
    correlation_id: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS))
    }
}

impl RequestContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancellation: CancellationToken::new(),
            actor: None,
            correlation_id: None,
        }
    }

    /// Sets the user on whose behalf the operation runs
    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Links the context to an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Runs `work` under this context's deadline and cancellation token.
    ///
    /// When either fires first, `work` is dropped. Any unit of work it held
    /// is dropped with it and rolls back, so nothing is persisted.
    pub async fn run<T, E, F>(&self, operation: &'static str, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        if self.cancellation.is_cancelled() {
            return Err(StoreError::Cancelled {
                operation: operation.to_string(),
            }
            .into());
        }

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(StoreError::Cancelled {
                operation: operation.to_string(),
            }
            .into()),
            outcome = tokio::time::timeout(self.timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    operation: operation.to_string(),
                    duration_ms: self.timeout.as_millis() as u64,
                }
                .into()),
            },
        }
    }
}
