//! Backend Collaborator
//!
//! Abstract interface to the remote service: auth, record CRUD and push
//! notifications. The concrete transport lives outside this crate;
//! [`MemoryBackend`] is a complete in-process implementation.

mod memory;

pub use memory::{MemoryBackend, Operation};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{AuthError, SubscriptionError, SyncError};
use crate::models::{Profile, Session, User};

// ========================
// Query Types
// ========================

/// Equality filter on one record field, e.g. `owner = "abc123"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub field: String,
    pub value: String,
}

impl RecordFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether a record satisfies this filter (string fields only)
    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

impl fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self.value.replace('\\', "\\\\").replace('"', "\\\"");
        write!(f, "{} = \"{}\"", self.field, escaped)
    }
}

/// One page of a list query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u32,
    pub total_pages: u32,
    pub items: Vec<Value>,
}

// ========================
// Change Notifications
// ========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// Push notification for one changed record. The payload is optional and
/// the core never relies on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub record_id: String,
    pub record: Option<Value>,
}

/// Callback the backend invokes for every change event. Must not block.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Token returned by [`Backend::subscribe`]; running it detaches the handler
pub struct Unsubscribe(Box<dyn FnOnce() + Send>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}

// ========================
// Backend Trait
// ========================

/// Remote service contract consumed by the session store and sync engine.
///
/// All calls may suspend; none may block the executor.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Exchange credentials for a session
    async fn authenticate(&self, identifier: &str, secret: &str) -> Result<Session, AuthError>;

    /// Create a new account; does not sign in
    async fn create_account(&self, profile: &Profile) -> Result<User, AuthError>;

    /// Best-effort server-side token revocation
    async fn revoke(&self, _session: &Session) -> Result<(), AuthError> {
        Ok(())
    }

    async fn list_records(
        &self,
        collection: &str,
        filter: &RecordFilter,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SyncError>;

    async fn create_record(&self, collection: &str, fields: Value) -> Result<Value, SyncError>;

    async fn update_record(&self, collection: &str, id: &str, fields: Value) -> Result<Value, SyncError>;

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), SyncError>;

    /// Attach `handler` to changes on `topic` within `collection`
    async fn subscribe(
        &self,
        collection: &str,
        topic: &str,
        handler: ChangeHandler,
    ) -> Result<Unsubscribe, SubscriptionError>;

    /// Fires (without payload) whenever the current token stops being valid
    fn session_invalidated(&self) -> broadcast::Receiver<()>;
}
