//! Authorization Gate.
//!
//! Two independent rights: whitelist membership (read live from the store on every
//! check) and administrator membership (a static set loaded at startup). Guards wrap an
//! operation and either run it or hand back a [`Denial`] carrying the reply text.

pub mod admins;

pub use admins::AdministratorSet;

use crate::app::persistence_gateway::{PersistenceError, SharedGateway};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// The identity a command arrived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub user_id: String,
    pub username: Option<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, username: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username,
        }
    }

    /// Username when the transport knows one, the raw id otherwise.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.user_id)
    }
}

/// Why a guarded operation did not run. `message` is sent to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub message: String,
}

/// Outcome of a guard: the operation's result, or a denial when it never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Allowed(T),
    Denied(Denial),
}

impl<T> Guarded<T> {
    pub fn is_denied(&self) -> bool {
        matches!(self, Guarded::Denied(_))
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    gateway: SharedGateway,
    admins: Arc<AdministratorSet>,
    developer_contact: String,
}

impl AuthorizationGate {
    pub fn new(
        gateway: SharedGateway,
        admins: Arc<AdministratorSet>,
        developer_contact: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            admins,
            developer_contact: developer_contact.into(),
        }
    }

    pub fn administrators(&self) -> &AdministratorSet {
        &self.admins
    }

    /// Membership in the whitelist as stored right now.
    pub async fn is_whitelisted(&self, user_id: &str) -> Result<bool, PersistenceError> {
        let ids = self.gateway.lock().await.list_whitelisted_ids().await?;
        Ok(ids.contains(user_id))
    }

    pub fn is_administrator(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }

    /// Runs `op` only for whitelisted callers.
    pub async fn require_whitelisted<F, Fut, T>(
        &self,
        caller: &Caller,
        op: F,
    ) -> Result<Guarded<T>, PersistenceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_whitelisted(&caller.user_id).await? {
            info!(user_id = %caller.user_id, "denied: caller is not whitelisted");
            return Ok(Guarded::Denied(Denial {
                message: format!(
                    "{} is not whitelisted.\nPlease send your user ID ({}) to the developer: {}",
                    caller.display_name(),
                    caller.user_id,
                    self.developer_contact
                ),
            }));
        }
        Ok(Guarded::Allowed(op().await))
    }

    /// Runs `op` only for administrators. Never touches the store.
    pub async fn require_administrator<F, Fut, T>(&self, caller: &Caller, op: F) -> Guarded<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_administrator(&caller.user_id) {
            info!(user_id = %caller.user_id, "denied: caller is not an administrator");
            return Guarded::Denied(Denial {
                message: format!(
                    "{} ({}) is not an administrator.",
                    caller.display_name(),
                    caller.user_id
                ),
            });
        }
        Guarded::Allowed(op().await)
    }
}
