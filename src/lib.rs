//! Todo Sync Client
//!
//! Layered like the app it serves:
//! - models / error / config: shared types
//! - backend: remote service contract (+ in-memory implementation)
//! - session: who is signed in, persisted across restarts
//! - subscription / sync: realtime, full-refresh list cache
//! - context / guard: lifecycle glue for the UI and navigation

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod models;
pub mod session;
pub mod subscription;
pub mod sync;

pub use backend::{Backend, MemoryBackend};
pub use config::ClientConfig;
pub use context::AppContext;
pub use error::{AuthError, ConfigError, RecordError, StorageError, SubscriptionError, SyncError};
pub use guard::{Admission, Route, RouteGuard};
pub use models::{Item, ListSnapshot, Profile, Session, User};
pub use session::{SessionState, SessionStore};
pub use subscription::ChangeSubscription;
pub use sync::{ListSyncEngine, SyncSettings};
