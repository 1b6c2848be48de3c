//! In-Memory Backend
//!
//! Full implementation of [`Backend`] kept in process memory: accounts,
//! tokens, record collections and change fan-out. Tests and the demo binary
//! run against it; it also supports an offline switch and one-shot fault
//! injection per operation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{Backend, ChangeAction, ChangeEvent, ChangeHandler, RecordFilter, RecordPage, Unsubscribe};
use crate::error::{AuthError, SubscriptionError, SyncError};
use crate::models::{Profile, Session, User};

/// Remote operations, used for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    CreateAccount,
    Revoke,
    List,
    Create,
    Update,
    Delete,
    Subscribe,
}

struct StoredUser {
    user: User,
    password: String,
}

struct Subscriber {
    collection: String,
    topic: String,
    handler: ChangeHandler,
}

impl Subscriber {
    fn wants(&self, collection: &str, record_id: &str) -> bool {
        self.collection == collection && (self.topic == "*" || self.topic == record_id)
    }
}

#[derive(Default)]
struct State {
    users: Vec<StoredUser>,
    /// token -> user id
    tokens: HashMap<String, String>,
    collections: HashMap<String, Vec<Value>>,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
    offline: bool,
    faults: HashSet<Operation>,
    calls: HashMap<Operation, usize>,
}

impl State {
    fn next_id(&mut self, prefix: char) -> String {
        self.next_id += 1;
        format!("{}{:014}", prefix, self.next_id)
    }

    /// Count the call, then apply the offline switch and pending faults
    fn enter(&mut self, op: Operation) -> Result<(), String> {
        *self.calls.entry(op).or_default() += 1;
        if self.offline {
            return Err("backend offline".to_string());
        }
        if self.faults.remove(&op) {
            return Err(format!("injected {:?} failure", op));
        }
        Ok(())
    }

    fn handlers_for(&self, collection: &str, record_id: &str) -> Vec<ChangeHandler> {
        self.subscribers
            .values()
            .filter(|s| s.wants(collection, record_id))
            .map(|s| s.handler.clone())
            .collect()
    }
}

pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    invalidated: broadcast::Sender<()>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (invalidated, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            invalidated,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an account directly, bypassing validation
    pub fn add_user(&self, email: &str, password: &str, name: &str) -> User {
        let mut state = self.lock();
        let user = User {
            id: state.next_id('u'),
            email: email.to_string(),
            name: name.to_string(),
        };
        state.users.push(StoredUser {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    /// While offline every operation fails with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make the next call of `op` fail once
    pub fn fail_next(&self, op: Operation) {
        self.lock().faults.insert(op);
    }

    /// Number of times `op` was attempted
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.lock().collections.get(collection).cloned().unwrap_or_default()
    }

    pub fn is_token_valid(&self, token: &str) -> bool {
        self.lock().tokens.contains_key(token)
    }

    /// Revoke every issued token and broadcast the invalidation signal
    pub fn invalidate_sessions(&self) {
        self.lock().tokens.clear();
        let _ = self.invalidated.send(());
    }

    fn notify(handlers: Vec<ChangeHandler>, event: ChangeEvent) {
        for handler in handlers {
            handler(event.clone());
        }
    }
}

fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ").to_string()
}

fn into_object(fields: Value) -> Result<Map<String, Value>, SyncError> {
    match fields {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Rejected(format!("expected an object, got {}", other))),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn authenticate(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let mut state = self.lock();
        state.enter(Operation::Authenticate).map_err(AuthError::Transport)?;

        let user = state
            .users
            .iter()
            .find(|u| u.user.email.eq_ignore_ascii_case(identifier) && u.password == secret)
            .map(|u| u.user.clone())
            .ok_or(AuthError::InvalidCredentials)?;

        let token = state.next_id('t');
        state.tokens.insert(token.clone(), user.id.clone());
        Ok(Session { token, user })
    }

    async fn create_account(&self, profile: &Profile) -> Result<User, AuthError> {
        let mut state = self.lock();
        state.enter(Operation::CreateAccount).map_err(AuthError::Transport)?;
        profile.validate()?;

        let email = profile.email.trim();
        if state.users.iter().any(|u| u.user.email.eq_ignore_ascii_case(email)) {
            return Err(AuthError::DuplicateAccount(email.to_string()));
        }

        let user = User {
            id: state.next_id('u'),
            email: email.to_string(),
            name: profile.name.clone(),
        };
        state.users.push(StoredUser {
            user: user.clone(),
            password: profile.password.clone(),
        });
        Ok(user)
    }

    async fn revoke(&self, session: &Session) -> Result<(), AuthError> {
        let mut state = self.lock();
        state.enter(Operation::Revoke).map_err(AuthError::Transport)?;
        state.tokens.remove(&session.token);
        Ok(())
    }

    async fn list_records(
        &self,
        collection: &str,
        filter: &RecordFilter,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SyncError> {
        let mut state = self.lock();
        state.enter(Operation::List).map_err(SyncError::Transport)?;
        if page == 0 || per_page == 0 {
            return Err(SyncError::Rejected("page and per_page start at 1".to_string()));
        }

        let matching: Vec<&Value> = state
            .collections
            .get(collection)
            .map(|records| records.iter().filter(|r| filter.matches(r)).collect())
            .unwrap_or_default();

        let total_items = matching.len() as u32;
        let total_pages = total_items.div_ceil(per_page);
        let start = ((page - 1) * per_page) as usize;
        let items = matching
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();

        Ok(RecordPage {
            page,
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    async fn create_record(&self, collection: &str, fields: Value) -> Result<Value, SyncError> {
        let (record, handlers) = {
            let mut state = self.lock();
            state.enter(Operation::Create).map_err(SyncError::Transport)?;
            let mut map = into_object(fields)?;

            let id = state.next_id('r');
            let stamp = now_stamp();
            map.insert("id".to_string(), Value::String(id.clone()));
            map.insert("collectionName".to_string(), Value::String(collection.to_string()));
            map.insert("created".to_string(), Value::String(stamp.clone()));
            map.insert("updated".to_string(), Value::String(stamp));

            let record = Value::Object(map);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(record.clone());
            (record, state.handlers_for(collection, &id))
        };

        Self::notify(
            handlers,
            ChangeEvent {
                action: ChangeAction::Create,
                record_id: record["id"].as_str().unwrap_or_default().to_string(),
                record: Some(record.clone()),
            },
        );
        Ok(record)
    }

    async fn update_record(&self, collection: &str, id: &str, fields: Value) -> Result<Value, SyncError> {
        let (record, handlers) = {
            let mut state = self.lock();
            state.enter(Operation::Update).map_err(SyncError::Transport)?;
            let patch = into_object(fields)?;

            let record = state
                .collections
                .get_mut(collection)
                .and_then(|records| records.iter_mut().find(|r| r["id"] == id))
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

            if let Value::Object(map) = record {
                for (key, value) in patch {
                    if key != "id" {
                        map.insert(key, value);
                    }
                }
                map.insert("updated".to_string(), Value::String(now_stamp()));
            }
            let record = record.clone();
            (record, state.handlers_for(collection, id))
        };

        Self::notify(
            handlers,
            ChangeEvent {
                action: ChangeAction::Update,
                record_id: id.to_string(),
                record: Some(record.clone()),
            },
        );
        Ok(record)
    }

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), SyncError> {
        let (record, handlers) = {
            let mut state = self.lock();
            state.enter(Operation::Delete).map_err(SyncError::Transport)?;

            let records = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            let pos = records
                .iter()
                .position(|r| r["id"] == id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            let record = records.remove(pos);
            (record, state.handlers_for(collection, id))
        };

        Self::notify(
            handlers,
            ChangeEvent {
                action: ChangeAction::Delete,
                record_id: id.to_string(),
                record: Some(record),
            },
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        topic: &str,
        handler: ChangeHandler,
    ) -> Result<Unsubscribe, SubscriptionError> {
        let mut state = self.lock();
        state.enter(Operation::Subscribe).map_err(SubscriptionError::Unavailable)?;

        state.next_id += 1;
        let key = state.next_id;
        state.subscribers.insert(
            key,
            Subscriber {
                collection: collection.to_string(),
                topic: topic.to_string(),
                handler,
            },
        );

        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        Ok(Unsubscribe::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().unwrap_or_else(|e| e.into_inner()).subscribers.remove(&key);
            }
        }))
    }

    fn session_invalidated(&self) -> broadcast::Receiver<()> {
        self.invalidated.subscribe()
    }
}
