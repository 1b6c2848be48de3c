//! Sync Engine Tests
//!
//! Scripted backend for exact responses and out-of-order delivery, plus the
//! in-memory backend for end-to-end flows with push notifications.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};

use super::{ListSyncEngine, SyncSettings};
use crate::backend::{
    Backend, ChangeHandler, MemoryBackend, Operation, RecordFilter, RecordPage, Unsubscribe,
};
use crate::error::{AuthError, SubscriptionError, SyncError};
use crate::models::{Item, Profile, Session, User};

type ListResult = Result<Vec<Value>, SyncError>;

// ========================
// Scripted Backend
// ========================

/// Answers list calls from a queue, or parks them until released when gated
struct ScriptedBackend {
    responses: Mutex<VecDeque<ListResult>>,
    gated: AtomicBool,
    gates: Mutex<Vec<Option<oneshot::Sender<ListResult>>>>,
    mutations: Mutex<Vec<String>>,
    invalidated: broadcast::Sender<()>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            gated: AtomicBool::new(false),
            gates: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            invalidated: broadcast::channel(1).0,
        })
    }

    fn gated() -> Arc<Self> {
        let backend = Self::new();
        backend.gated.store(true, Ordering::SeqCst);
        backend
    }

    fn respond(&self, result: ListResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn parked(&self) -> usize {
        self.gates.lock().unwrap().len()
    }

    /// Complete the `index`-th parked list call (in dispatch order)
    fn release(&self, index: usize, result: ListResult) {
        let gate = self.gates.lock().unwrap()[index].take().expect("gate already released");
        let _ = gate.send(result);
    }

    async fn wait_parked(&self, count: usize) {
        for _ in 0..1000 {
            if self.parked() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {} parked list calls, saw {}", count, self.parked());
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn authenticate(&self, _identifier: &str, _secret: &str) -> Result<Session, AuthError> {
        Err(AuthError::Transport("scripted backend".to_string()))
    }

    async fn create_account(&self, _profile: &Profile) -> Result<User, AuthError> {
        Err(AuthError::Transport("scripted backend".to_string()))
    }

    async fn list_records(
        &self,
        _collection: &str,
        _filter: &RecordFilter,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SyncError> {
        let items = if self.gated.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().push(Some(tx));
            rx.await
                .unwrap_or_else(|_| Err(SyncError::Transport("gate dropped".to_string())))?
        } else {
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or(Ok(Vec::new()))?
        };
        Ok(RecordPage {
            page,
            per_page,
            total_items: items.len() as u32,
            total_pages: 1,
            items,
        })
    }

    async fn create_record(&self, _collection: &str, fields: Value) -> Result<Value, SyncError> {
        self.mutations.lock().unwrap().push(format!("create:{}", fields["title"]));
        Ok(fields)
    }

    async fn update_record(&self, _collection: &str, id: &str, fields: Value) -> Result<Value, SyncError> {
        self.mutations.lock().unwrap().push(format!("update:{}:{}", id, fields));
        Ok(fields)
    }

    async fn delete_record(&self, _collection: &str, id: &str) -> Result<(), SyncError> {
        self.mutations.lock().unwrap().push(format!("delete:{}", id));
        Ok(())
    }

    async fn subscribe(
        &self,
        _collection: &str,
        _topic: &str,
        _handler: ChangeHandler,
    ) -> Result<Unsubscribe, SubscriptionError> {
        Ok(Unsubscribe::noop())
    }

    fn session_invalidated(&self) -> broadcast::Receiver<()> {
        self.invalidated.subscribe()
    }
}

// ========================
// Helpers
// ========================

fn owner() -> User {
    User {
        id: "u1".to_string(),
        email: "a@b.io".to_string(),
        name: "A".to_string(),
    }
}

fn record(id: &str, title: &str, completed: bool) -> Value {
    json!({ "id": id, "title": title, "completed": completed, "owner": "u1" })
}

fn engine_on(backend: Arc<dyn Backend>) -> Arc<ListSyncEngine> {
    Arc::new(ListSyncEngine::new(backend, owner(), SyncSettings::default()))
}

fn titles(engine: &ListSyncEngine) -> Vec<String> {
    engine.snapshot().iter().map(|item| item.title.clone()).collect()
}

/// Memory backend with a signed-in owner; returns the owner as registered there
fn memory_setup(page_size: u32) -> (Arc<MemoryBackend>, User, Arc<ListSyncEngine>) {
    let backend = Arc::new(MemoryBackend::new());
    let user = backend.add_user("a@b.io", "password1", "A");
    let settings = SyncSettings {
        page_size,
        ..Default::default()
    };
    let engine = Arc::new(ListSyncEngine::new(backend.clone(), user.clone(), settings));
    (backend, user, engine)
}

// ========================
// Refresh
// ========================

#[tokio::test]
async fn test_refresh_yields_backend_items() {
    let backend = ScriptedBackend::new();
    backend.respond(Ok(vec![record("1", "a", false)]));
    let engine = engine_on(backend.clone());

    let snapshot = engine.refresh().await.unwrap();
    assert_eq!(
        snapshot.items(),
        &[Item {
            id: "1".to_string(),
            title: "a".to_string(),
            completed: false,
            owner: "u1".to_string(),
        }]
    );
    assert_eq!(engine.snapshot(), snapshot);
}

#[tokio::test]
async fn test_toggle_then_refresh_sees_completed() {
    let backend = ScriptedBackend::new();
    backend.respond(Ok(vec![record("1", "a", false)]));
    backend.respond(Ok(vec![record("1", "a", true)]));
    let engine = engine_on(backend.clone());

    let snapshot = engine.refresh().await.unwrap();
    let item = snapshot.get("1").unwrap().clone();
    engine.toggle(&item).await.unwrap();

    assert_eq!(backend.mutations(), vec![r#"update:1:{"completed":true}"#.to_string()]);
    assert!(engine.snapshot().get("1").unwrap().completed);
}

#[tokio::test]
async fn test_failed_refresh_keeps_snapshot() {
    let backend = ScriptedBackend::new();
    backend.respond(Ok(vec![record("1", "a", false)]));
    backend.respond(Err(SyncError::Transport("connection reset".to_string())));
    let engine = engine_on(backend.clone());

    let before = engine.refresh().await.unwrap();
    let err = engine.refresh().await.unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert!(!err.to_string().is_empty());
    assert_eq!(engine.snapshot(), before);
}

#[tokio::test]
async fn test_skips_malformed_and_foreign_records() {
    let backend = ScriptedBackend::new();
    backend.respond(Ok(vec![
        record("1", "a", false),
        json!({ "id": "2", "title": "no flag", "owner": "u1" }),
        json!({ "id": "3", "title": "theirs", "completed": false, "owner": "u2" }),
        json!({ "id": "4", "title": 7, "completed": false, "owner": "u1" }),
        record("5", "e", true),
    ]));
    let engine = engine_on(backend.clone());

    engine.refresh().await.unwrap();
    assert_eq!(titles(&engine), vec!["a", "e"]);
}

// ========================
// Ordering
// ========================

#[tokio::test]
async fn test_older_refresh_does_not_overwrite_newer() {
    let backend = ScriptedBackend::gated();
    let engine = engine_on(backend.clone());

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh().await }
    });
    backend.wait_parked(1).await;
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh().await }
    });
    backend.wait_parked(2).await;

    backend.release(1, Ok(vec![record("1", "newer", false)]));
    let applied = second.await.unwrap().unwrap();
    assert_eq!(applied.sequence(), 2);

    backend.release(0, Ok(vec![record("1", "older", false)]));
    let returned = first.await.unwrap().unwrap();

    assert_eq!(returned.sequence(), 2);
    assert_eq!(titles(&engine), vec!["newer"]);
}

#[tokio::test]
async fn test_highest_sequence_wins_in_any_arrival_order() {
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for order in orders {
        let backend = ScriptedBackend::gated();
        let engine = engine_on(backend.clone());

        let mut tasks = Vec::new();
        for dispatched in 0..3 {
            tasks.push(tokio::spawn({
                let engine = engine.clone();
                async move { engine.refresh().await }
            }));
            backend.wait_parked(dispatched + 1).await;
        }

        for index in order {
            backend.release(index, Ok(vec![record("1", &format!("r{}", index + 1), false)]));
            tokio::task::yield_now().await;
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.snapshot().sequence(), 3, "order {:?}", order);
        assert_eq!(titles(&engine), vec!["r3"], "order {:?}", order);
    }
}

#[tokio::test]
async fn test_in_flight_refresh_discarded_after_shutdown() {
    let backend = ScriptedBackend::gated();
    let engine = engine_on(backend.clone());

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh().await }
    });
    backend.wait_parked(1).await;

    engine.shutdown();
    backend.release(0, Ok(vec![record("1", "late", false)]));

    assert_eq!(pending.await.unwrap(), Err(SyncError::Closed));
    assert!(engine.snapshot().is_empty());
}

// ========================
// Mutations
// ========================

#[tokio::test]
async fn test_blank_create_is_noop() {
    let backend = ScriptedBackend::new();
    backend.respond(Ok(vec![record("1", "a", false)]));
    let engine = engine_on(backend.clone());
    let before = engine.refresh().await.unwrap();

    engine.create("").await.unwrap();
    engine.create("   ").await.unwrap();

    assert!(backend.mutations().is_empty());
    assert_eq!(engine.snapshot(), before);
}

#[tokio::test]
async fn test_create_trims_title() {
    let backend = ScriptedBackend::new();
    let engine = engine_on(backend.clone());

    engine.create("  milk  ").await.unwrap();
    assert_eq!(backend.mutations(), vec![r#"create:"milk""#.to_string()]);
}

#[tokio::test]
async fn test_failed_create_does_not_refresh() {
    let (backend, _user, engine) = memory_setup(50);
    backend.fail_next(Operation::Create);

    let err = engine.create("milk").await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(backend.calls(Operation::List), 0);
    assert_eq!(engine.snapshot().sequence(), 0);
}

#[tokio::test]
async fn test_create_toggle_delete_round() {
    let (_backend, _user, engine) = memory_setup(50);

    engine.create("a").await.unwrap();
    engine.create("b").await.unwrap();
    assert_eq!(titles(&engine), vec!["a", "b"]);

    let b = engine.snapshot().iter().find(|i| i.title == "b").unwrap().clone();
    engine.toggle(&b).await.unwrap();
    let snapshot = engine.snapshot();
    assert!(snapshot.get(&b.id).unwrap().completed);
    assert!(!snapshot.iter().find(|i| i.title == "a").unwrap().completed);

    engine.delete(&b.id).await.unwrap();
    assert_eq!(titles(&engine), vec!["a"]);
}

#[tokio::test]
async fn test_delete_missing_surfaces_not_found() {
    let (_backend, _user, engine) = memory_setup(50);
    engine.create("a").await.unwrap();
    let before = engine.snapshot();

    let err = engine.delete("missing").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert_eq!(engine.snapshot(), before);
}

#[tokio::test]
async fn test_refresh_walks_all_pages() {
    let (backend, user, engine) = memory_setup(2);
    for i in 0..5 {
        backend
            .create_record("todos", json!({ "title": format!("t{}", i), "completed": false, "owner": user.id }))
            .await
            .unwrap();
    }

    engine.refresh().await.unwrap();
    assert_eq!(titles(&engine), vec!["t0", "t1", "t2", "t3", "t4"]);
    assert_eq!(backend.calls(Operation::List), 3);
}

// ========================
// Subscription
// ========================

#[tokio::test]
async fn test_push_notification_triggers_refresh() {
    let (backend, user, engine) = memory_setup(50);
    engine.start().await.unwrap();
    assert!(engine.is_live());
    let mut rx = engine.watch();

    // Another client adds a record for the same user
    backend
        .create_record("todos", json!({ "title": "remote", "completed": false, "owner": user.id }))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| s.len() == 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(titles(&engine), vec!["remote"]);
}

#[tokio::test]
async fn test_start_without_subscription_still_fetches() {
    let (backend, user, engine) = memory_setup(50);
    backend
        .create_record("todos", json!({ "title": "a", "completed": false, "owner": user.id }))
        .await
        .unwrap();
    backend.fail_next(Operation::Subscribe);

    let snapshot = engine.start().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(!engine.is_live());

    engine.resubscribe().await.unwrap();
    assert!(engine.is_live());
    assert_eq!(backend.subscriber_count(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_subscription() {
    let (backend, _user, engine) = memory_setup(50);
    engine.start().await.unwrap();
    assert_eq!(backend.subscriber_count(), 1);

    engine.shutdown();
    engine.shutdown();

    assert_eq!(backend.subscriber_count(), 0);
    assert!(engine.is_closed());
    assert_eq!(engine.create("late").await, Err(SyncError::Closed));
    assert_eq!(engine.refresh().await, Err(SyncError::Closed));
    assert_eq!(engine.resubscribe().await, Err(SubscriptionError::Closed));
}

#[tokio::test]
async fn test_drop_closes_subscription() {
    let (backend, _user, engine) = memory_setup(50);
    engine.start().await.unwrap();
    assert_eq!(backend.subscriber_count(), 1);

    drop(engine);
    assert_eq!(backend.subscriber_count(), 0);
}
