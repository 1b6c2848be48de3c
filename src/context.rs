//! Application Context
//!
//! Owns the session store and the sync engine of the signed-in user. The
//! engine is torn down from inside the session transition itself (a
//! listener registered at construction), so signing out, an expired token
//! or a user switch always closes the old engine's subscription before
//! anyone observes the new state.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::guard::RouteGuard;
use crate::session::{FileSessionStorage, SessionListener, SessionState, SessionStorage, SessionStore};
use crate::sync::{ListSyncEngine, SyncSettings};

type EngineSlot = Arc<Mutex<Option<Arc<ListSyncEngine>>>>;

fn lock(slot: &EngineSlot) -> MutexGuard<'_, Option<Arc<ListSyncEngine>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct AppContext {
    backend: Arc<dyn Backend>,
    session: SessionStore,
    settings: SyncSettings,
    engine: EngineSlot,
    _listener: SessionListener,
}

impl AppContext {
    /// Build the context and start following backend invalidations.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn Backend>, storage: Box<dyn SessionStorage>, config: &ClientConfig) -> Self {
        let session = SessionStore::new(backend.clone(), storage);
        let engine: EngineSlot = Arc::new(Mutex::new(None));

        let slot = engine.clone();
        let listener = session.subscribe_to_changes(move |state| teardown_stale(&slot, state));
        session.watch_invalidation();

        Self {
            backend,
            session,
            settings: config.sync_settings(),
            engine,
            _listener: listener,
        }
    }

    /// Context persisting the session under the config's data dir
    pub fn from_config(backend: Arc<dyn Backend>, config: &ClientConfig) -> Self {
        let storage = FileSessionStorage::new(config.session_path());
        Self::new(backend, Box::new(storage), config)
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn guard(&self) -> RouteGuard {
        RouteGuard::new(self.session.clone())
    }

    /// Engine currently held, without creating one
    pub fn active_engine(&self) -> Option<Arc<ListSyncEngine>> {
        lock(&self.engine).clone()
    }

    /// Sync engine for the signed-in user, created and started on first use
    pub async fn todos(&self) -> Result<Arc<ListSyncEngine>, SyncError> {
        let engine = {
            let mut slot = lock(&self.engine);
            let user = self.session.user().ok_or(SyncError::NotAuthenticated)?;

            if let Some(existing) = slot.as_ref() {
                if existing.owner().id == user.id && !existing.is_closed() {
                    return Ok(existing.clone());
                }
            }

            let engine = Arc::new(ListSyncEngine::new(self.backend.clone(), user, self.settings.clone()));
            if let Some(previous) = slot.replace(engine.clone()) {
                previous.shutdown();
            }
            engine
        };

        if let Err(e) = engine.start().await {
            // Drop the half-started engine so the next call starts over
            let mut slot = lock(&self.engine);
            if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, &engine)) {
                slot.take();
            }
            engine.shutdown();
            return Err(e);
        }
        Ok(engine)
    }

    pub async fn logout(&self) {
        self.session.logout().await;
    }
}

/// Shut down the held engine if it no longer matches the signed-in user
fn teardown_stale(slot: &EngineSlot, state: &SessionState) {
    let mut slot = lock(slot);
    let stale = match (state.user(), slot.as_ref()) {
        (_, None) => false,
        (Some(user), Some(engine)) => engine.owner().id != user.id,
        (None, Some(_)) => true,
    };
    if stale {
        if let Some(engine) = slot.take() {
            engine.shutdown();
        }
    }
}
