//! List Sync Engine
//!
//! Keeps the signed-in user's todo list cached and consistent with the
//! backend. Reconciliation is always a full refetch: mutations and push
//! notifications only ever trigger [`ListSyncEngine::refresh`], the engine
//! never patches the cache itself.
//!
//! Each refresh takes a sequence number when dispatched. A result is applied
//! only if its number is higher than that of the snapshot currently held, so
//! a slow, older fetch can never overwrite a newer one.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::sync::watch;

use crate::backend::{Backend, RecordFilter};
use crate::error::{SubscriptionError, SyncError};
use crate::models::{Item, ListSnapshot, User};
use crate::subscription::ChangeSubscription;

/// Where the list lives and how it is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub collection: String,
    pub topic: String,
    pub page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            collection: "todos".to_string(),
            topic: "*".to_string(),
            page_size: 50,
        }
    }
}

struct EngineInner {
    backend: Arc<dyn Backend>,
    owner: User,
    settings: SyncSettings,
    next_sequence: AtomicU64,
    snapshot: watch::Sender<ListSnapshot>,
    closed: AtomicBool,
}

impl EngineInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    async fn refresh(&self) -> Result<ListSnapshot, SyncError> {
        self.ensure_open()?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Refresh #{} dispatched", sequence);

        let items = self
            .fetch_all()
            .await
            .inspect_err(|e| log::warn!("Refresh #{} failed, keeping last snapshot: {}", sequence, e))?;
        self.ensure_open()?;

        let fresh = ListSnapshot::new(sequence, items);
        let applied = self.snapshot.send_if_modified(|current| {
            if self.is_closed() || sequence <= current.sequence() {
                return false;
            }
            *current = fresh;
            true
        });

        if applied {
            log::debug!("Refresh #{} applied", sequence);
        } else {
            log::debug!("Refresh #{} discarded, newer snapshot already applied", sequence);
        }
        Ok(self.snapshot.borrow().clone())
    }

    /// Walk every page of the owner's records
    async fn fetch_all(&self) -> Result<Vec<Item>, SyncError> {
        let filter = RecordFilter::eq("owner", self.owner.id.as_str());
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let batch = self
                .backend
                .list_records(&self.settings.collection, &filter, page, self.settings.page_size)
                .await?;
            let exhausted = batch.items.is_empty() || page >= batch.total_pages;

            for record in &batch.items {
                match Item::from_record(record) {
                    Ok(item) if item.owner == self.owner.id => items.push(item),
                    Ok(item) => log::warn!("Skipping record {} owned by {}", item.id, item.owner),
                    Err(e) => log::warn!("Skipping record: {}", e),
                }
            }

            if exhausted {
                return Ok(items);
            }
            page += 1;
        }
    }
}

pub struct ListSyncEngine {
    inner: Arc<EngineInner>,
    subscription: Mutex<Option<ChangeSubscription>>,
}

impl ListSyncEngine {
    /// Create an idle engine for `owner`; call [`start`](Self::start) to go live
    pub fn new(backend: Arc<dyn Backend>, owner: User, settings: SyncSettings) -> Self {
        let (snapshot, _) = watch::channel(ListSnapshot::default());
        Self {
            inner: Arc::new(EngineInner {
                backend,
                owner,
                settings,
                next_sequence: AtomicU64::new(0),
                snapshot,
                closed: AtomicBool::new(false),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Open the change subscription, then perform the initial fetch.
    ///
    /// Subscribing first means no change between the two steps is missed.
    /// A failed subscription is logged and the engine keeps working without
    /// live updates; [`resubscribe`](Self::resubscribe) retries it.
    pub async fn start(&self) -> Result<ListSnapshot, SyncError> {
        if let Err(e) = self.resubscribe().await {
            log::warn!("Live updates disabled for {}: {}", self.inner.owner.id, e);
        }
        self.refresh().await
    }

    fn subscription(&self) -> MutexGuard<'_, Option<ChangeSubscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn owner(&self) -> &User {
        &self.inner.owner
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Latest applied snapshot
    pub fn snapshot(&self) -> ListSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is applied
    pub fn watch(&self) -> watch::Receiver<ListSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.subscription().as_ref().is_some_and(ChangeSubscription::is_open)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    // ========================
    // Operations
    // ========================

    /// Refetch the whole list and apply it unless a newer result landed first.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<ListSnapshot, SyncError> {
        self.inner.refresh().await
    }

    /// Add a todo. Blank titles are ignored without contacting the backend.
    pub async fn create(&self, title: &str) -> Result<(), SyncError> {
        let title = title.trim();
        if title.is_empty() {
            log::debug!("Ignoring create with blank title");
            return Ok(());
        }
        self.inner.ensure_open()?;

        let fields = json!({
            "title": title,
            "completed": false,
            "owner": self.inner.owner.id,
        });
        self.inner
            .backend
            .create_record(&self.inner.settings.collection, fields)
            .await
            .inspect_err(|e| log::warn!("Create failed: {}", e))?;
        self.refresh().await.map(|_| ())
    }

    /// Flip `completed` on the item with `item.id`
    pub async fn toggle(&self, item: &Item) -> Result<(), SyncError> {
        self.inner.ensure_open()?;

        self.inner
            .backend
            .update_record(
                &self.inner.settings.collection,
                &item.id,
                json!({ "completed": !item.completed }),
            )
            .await
            .inspect_err(|e| log::warn!("Toggle of {} failed: {}", item.id, e))?;
        self.refresh().await.map(|_| ())
    }

    pub async fn delete(&self, item_id: &str) -> Result<(), SyncError> {
        self.inner.ensure_open()?;

        self.inner
            .backend
            .delete_record(&self.inner.settings.collection, item_id)
            .await
            .inspect_err(|e| log::warn!("Delete of {} failed: {}", item_id, e))?;
        self.refresh().await.map(|_| ())
    }

    /// Open (or reopen) the change subscription whose handler is `refresh()`
    pub async fn resubscribe(&self) -> Result<(), SubscriptionError> {
        if self.is_closed() {
            return Err(SubscriptionError::Closed);
        }
        if self.is_live() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let settings = &self.inner.settings;
        let subscription = ChangeSubscription::open(
            self.inner.backend.as_ref(),
            &settings.collection,
            &settings.topic,
            move |_event| {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else { return };
                    if let Err(e) = inner.refresh().await {
                        log::warn!("Push-triggered refresh failed: {}", e);
                    }
                }
            },
        )
        .await?;

        let mut slot = self.subscription();
        // Shut down while the subscribe call was in flight
        if self.is_closed() {
            subscription.close();
            return Err(SubscriptionError::Closed);
        }
        if let Some(previous) = slot.replace(subscription) {
            previous.close();
        }
        Ok(())
    }

    /// Stop applying results and close the subscription. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = self.subscription().take() {
            subscription.close();
        }
        log::info!("Sync engine for {} shut down", self.inner.owner.id);
    }
}

impl Drop for ListSyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
