//! Error Types
//!
//! One enum per failure domain. Every variant renders a message that can be
//! shown to the user as-is.

use thiserror::Error;

/// Login / registration failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account already exists for {0}")]
    DuplicateAccount(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Could not reach the server: {0}")]
    Transport(String),
    #[error("Account created, but signing in failed: {0}")]
    SignInAfterRegister(String),
}

/// Fetch and mutation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Could not reach the server: {0}")]
    Transport(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Server rejected the request: {0}")]
    Rejected(String),
    #[error("The todo list was closed")]
    Closed,
}

/// Change-channel establishment failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Live updates unavailable: {0}")]
    Unavailable(String),
    #[error("The todo list was closed")]
    Closed,
}

/// Why a backend record could not become an [`Item`](crate::models::Item)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record: {0}")]
pub struct RecordError(pub String);

/// Session persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session file is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// Config file failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
