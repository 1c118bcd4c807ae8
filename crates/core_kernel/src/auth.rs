//! Capability checks
//!
//! Services are generic over an [`Authorizer`], so the authorization
//! component is chosen when the services are wired together rather than
//! discovered at runtime.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::identifiers::UserId;

/// Actions a caller may be allowed to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageBills,
    RecordPayments,
    ManageLoans,
    /// Destructive operations outside the normal lifecycle
    AdministrativeOverride,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{actor} lacks capability {capability:?}")]
pub struct AccessDenied {
    pub actor: String,
    pub capability: Capability,
}

impl AccessDenied {
    pub fn new(actor: Option<UserId>, capability: Capability) -> Self {
        Self {
            actor: actor.map_or_else(|| "anonymous caller".to_string(), |id| id.to_string()),
            capability,
        }
    }
}

pub trait Authorizer: Send + Sync + 'static {
    fn check(&self, actor: Option<UserId>, capability: Capability) -> Result<(), AccessDenied>;
}

/// Grants everything; suitable for trusted in-process callers
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn check(&self, _actor: Option<UserId>, _capability: Capability) -> Result<(), AccessDenied> {
        Ok(())
    }
}

/// Static grant table keyed by user
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    grants: HashMap<UserId, HashSet<Capability>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user: UserId, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.grants.entry(user).or_default().extend(capabilities);
        self
    }
}

impl Authorizer for RoleAuthorizer {
    fn check(&self, actor: Option<UserId>, capability: Capability) -> Result<(), AccessDenied> {
        let allowed = actor
            .and_then(|id| self.grants.get(&id))
            .is_some_and(|caps| caps.contains(&capability));
        if allowed {
            Ok(())
        } else {
            Err(AccessDenied::new(actor, capability))
        }
    }
}
