//! Client Models
//!
//! Data structures shared by the session store, the sync engine and the
//! backend collaborator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, RecordError};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 8;

// ========================
// Session
// ========================

/// Authenticated user record (the "account" returned by the backend)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Credential token plus the identity it was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Registration form
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Profile {
    pub fn new(email: impl Into<String>, password: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: name.into(),
        }
    }

    /// Local checks run before any remote call
    pub fn validate(&self) -> Result<(), AuthError> {
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(AuthError::Validation(format!("invalid email address: {:?}", email))),
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

// Password stays out of logs
impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

// ========================
// Item
// ========================

/// A single todo record owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub owner: String,
}

impl Item {
    /// Parse an untyped backend record.
    ///
    /// All four fields are required and must have the right JSON type;
    /// extra fields (timestamps, collection metadata) are ignored.
    pub fn from_record(record: &Value) -> Result<Self, RecordError> {
        let item: Item =
            serde_json::from_value(record.clone()).map_err(|e| RecordError(e.to_string()))?;
        if item.id.is_empty() {
            return Err(RecordError("empty id".to_string()));
        }
        if item.title.trim().is_empty() {
            return Err(RecordError(format!("empty title on record {}", item.id)));
        }
        Ok(item)
    }
}

// ========================
// Snapshot
// ========================

/// Read-only view of the cached list, in server order.
///
/// Cloning is cheap; the item storage is shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSnapshot {
    sequence: u64,
    items: Arc<Vec<Item>>,
}

impl ListSnapshot {
    /// Build a snapshot, dropping repeated ids (first occurrence wins)
    pub fn new(sequence: u64, items: Vec<Item>) -> Self {
        let mut seen = HashSet::with_capacity(items.len());
        let items: Vec<Item> = items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        Self {
            sequence,
            items: Arc::new(items),
        }
    }

    /// Sequence number of the refresh that produced this snapshot (0 = never fetched)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.completed).count()
    }
}

impl<'a> IntoIterator for &'a ListSnapshot {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
