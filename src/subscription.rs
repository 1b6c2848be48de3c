//! Change Subscription
//!
//! Wraps a backend push channel into an owned, cancellable handle. Events
//! are queued by the backend callback and handed to the async handler by a
//! separate task, so the backend never waits on the handler.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{Backend, ChangeEvent, ChangeHandler, Unsubscribe};
use crate::error::SubscriptionError;

struct Active {
    unsubscribe: Unsubscribe,
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

pub struct ChangeSubscription {
    collection: String,
    topic: String,
    active: Mutex<Option<Active>>,
}

impl ChangeSubscription {
    /// Attach `handler` to `topic` in `collection`.
    ///
    /// The handler runs once per change event, one event at a time, on a
    /// spawned task. Must be called inside a tokio runtime.
    pub async fn open<F, Fut>(
        backend: &dyn Backend,
        collection: &str,
        topic: &str,
        handler: F,
    ) -> Result<Self, SubscriptionError>
    where
        F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let sink: ChangeHandler = Arc::new(move |event: ChangeEvent| {
            // Receiver is gone once the subscription closed
            let _ = tx.send(event);
        });

        let unsubscribe = backend
            .subscribe(collection, topic, sink)
            .await
            .inspect_err(|e| log::warn!("Subscribe to {}/{} failed: {}", collection, topic, e))?;

        let (stop, mut stopped) = oneshot::channel::<()>();
        let pump = tokio::spawn(async move {
            loop {
                // Only the wait is cancelled; a handler already running finishes
                let event = tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    event = rx.recv() => event,
                };
                match event {
                    Some(event) => handler(event).await,
                    None => break,
                }
            }
        });

        log::info!("Subscribed to {}/{}", collection, topic);
        Ok(Self {
            collection: collection.to_string(),
            topic: topic.to_string(),
            active: Mutex::new(Some(Active {
                unsubscribe,
                stop,
                pump,
            })),
        })
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Detach from the backend. Returns `true` only for the call that
    /// actually tore the subscription down; later calls are no-ops.
    pub fn close(&self) -> bool {
        let Some(active) = self.active().take() else {
            return false;
        };
        active.unsubscribe.run();
        let _ = active.stop.send(());
        drop(active.pump);
        log::info!("Unsubscribed from {}/{}", self.collection, self.topic);
        true
    }

    pub fn is_open(&self) -> bool {
        self.active().is_some()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("collection", &self.collection)
            .field("topic", &self.topic)
            .field("open", &self.is_open())
            .finish()
    }
}
