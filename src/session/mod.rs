//! Session Store
//!
//! Single owner of "who is signed in". Every transition goes through
//! [`SessionStore::transition`], which persists the new state and then calls
//! every registered listener before returning, so callers that `await` a
//! login or logout observe the new state immediately afterwards.

mod storage;

pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::error::AuthError;
use crate::models::{Profile, Session, User};

/// Anonymous, or signed in with exactly one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            SessionState::Anonymous => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }
}

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

struct Inner {
    backend: Arc<dyn Backend>,
    storage: Box<dyn SessionStorage>,
    state: RwLock<SessionState>,
    // Held across write, persist and notify so transitions never interleave
    transitions: Mutex<()>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    invalidation: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.invalidation.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}

/// Handle for one change listener; dropping it unregisters the listener
#[must_use = "dropping the listener unregisters it"]
pub struct SessionListener {
    id: u64,
    inner: Weak<Inner>,
}

impl SessionListener {
    pub fn cancel(self) {}
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Shared handle to the current session; clones see the same state
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Build the store, restoring a persisted session synchronously
    pub fn new(backend: Arc<dyn Backend>, storage: Box<dyn SessionStorage>) -> Self {
        let restored = match storage.load() {
            Ok(Some(session)) => {
                log::info!("Restored session for user {}", session.user.id);
                SessionState::Authenticated(session)
            }
            Ok(None) => SessionState::Anonymous,
            Err(e) => {
                log::warn!("Ignoring unreadable persisted session: {}", e);
                SessionState::Anonymous
            }
        };

        Self {
            inner: Arc::new(Inner {
                backend,
                storage,
                state: RwLock::new(restored),
                transitions: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                invalidation: Mutex::new(None),
            }),
        }
    }

    pub fn current(&self) -> SessionState {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.current().session().cloned()
    }

    pub fn user(&self) -> Option<User> {
        self.current().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_authenticated()
    }

    // ========================
    // Operations
    // ========================

    /// Sign in. On failure the current state is left untouched.
    pub async fn authenticate(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AuthError::Validation("email and password are required".to_string()));
        }

        let session = self
            .inner
            .backend
            .authenticate(identifier, secret)
            .await
            .inspect_err(|e| log::warn!("Sign-in failed for {}: {}", identifier, e))?;

        log::info!("Signed in as {}", session.user.id);
        self.transition(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    /// Create an account and sign in with the same credentials
    pub async fn register(&self, profile: &Profile) -> Result<Session, AuthError> {
        profile.validate()?;

        let account = self.inner.backend.create_account(profile).await?;
        log::info!("Created account {}", account.id);

        self.authenticate(&profile.email, &profile.password)
            .await
            .map_err(|e| AuthError::SignInAfterRegister(e.to_string()))
    }

    /// Clear the local session, then revoke the token remotely (best effort)
    pub async fn logout(&self) {
        let previous = self.session();
        self.transition(SessionState::Anonymous);

        if let Some(session) = previous {
            log::info!("Signed out {}", session.user.id);
            if let Err(e) = self.inner.backend.revoke(&session).await {
                log::warn!("Remote sign-out failed, local session already cleared: {}", e);
            }
        }
    }

    /// External invalidation (expired or revoked token)
    pub fn invalidate(&self) {
        if self.is_authenticated() {
            log::info!("Session invalidated externally");
            self.transition(SessionState::Anonymous);
        }
    }

    /// Register a listener called on every transition, with the new state.
    ///
    /// Listeners run synchronously inside the transition and must not block
    /// or start another transition.
    pub fn subscribe_to_changes(
        &self,
        handler: impl Fn(&SessionState) + Send + Sync + 'static,
    ) -> SessionListener {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(handler)));
        SessionListener {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Follow the backend's invalidation channel. Must run inside a tokio runtime.
    pub fn watch_invalidation(&self) {
        let mut rx = self.inner.backend.session_invalidated();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionStore { inner }.invalidate();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .inner
            .invalidation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // ========================
    // Transitions
    // ========================

    fn transition(&self, next: SessionState) {
        let _serial = self.inner.transitions.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                return;
            }
            *state = next.clone();
        }

        let persisted = match &next {
            SessionState::Authenticated(session) => self.inner.storage.save(session),
            SessionState::Anonymous => self.inner.storage.clear(),
        };
        if let Err(e) = persisted {
            log::warn!("Failed to persist session state: {}", e);
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&next);
        }
    }
}
