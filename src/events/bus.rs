//! # Event Bus
//!
//! In-process publish/subscribe broker. Routes typed events from producers to
//! every observer subscribed to that event's type (or to all events), with
//! error isolation between observers: a failing observer never prevents its
//! siblings from being notified, and never propagates its failure into the
//! publisher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{Event, SubscriptionFilter};

/// An observer of events published on an [`EventBus`].
///
/// `id` identifies the observer for the purposes of `unsubscribe`; it need
/// not be globally unique, but two subscriptions sharing an id are both
/// removed by one `unsubscribe` call.
#[async_trait]
pub trait EventObserver: Send + Sync {
    fn id(&self) -> String;

    async fn on_event(&self, event: &Event);
}

struct Subscription {
    observer: Arc<dyn EventObserver>,
    filter: SubscriptionFilter,
}

struct EventBusInner {
    subscriptions: Vec<Subscription>,
}

/// Publish/subscribe broker. Cheaply cloneable; all clones share the same
/// subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
    source_id: String,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("source_id", &self.source_id)
            .finish()
    }
}

impl EventBus {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                subscriptions: Vec::new(),
            })),
            source_id: source_id.into(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Register `observer` for events matching `filter`. `filter = Types(∅)`
    /// behaves the same as `All` would be pointless to express that way —
    /// callers wanting everything should pass `SubscriptionFilter::All`.
    pub async fn subscribe(&self, observer: Arc<dyn EventObserver>, filter: SubscriptionFilter) {
        let mut inner = self.inner.lock().await;
        debug!(observer_id = %observer.id(), "subscribing observer to event bus");
        inner.subscriptions.push(Subscription { observer, filter });
    }

    /// Remove every subscription registered under `observer_id`.
    pub async fn unsubscribe(&self, observer_id: &str) {
        let mut inner = self.inner.lock().await;
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.observer.id() != observer_id);
        if inner.subscriptions.len() != before {
            debug!(observer_id, "unsubscribed observer from event bus");
        }
    }

    /// Fan out `event` to every matching observer concurrently. Returns only
    /// after every matched observer's handler has run to completion (or its
    /// failure was captured).
    ///
    /// The subscriber list is snapshotted before fan-out begins, so an
    /// observer that unsubscribes itself mid-handler cannot deadlock this
    /// call or be skipped partway through.
    pub async fn publish(&self, event: Event) {
        let matched: Vec<Arc<dyn EventObserver>> = {
            let inner = self.inner.lock().await;
            inner
                .subscriptions
                .iter()
                .filter(|s| s.filter.matches(event.event_type()))
                .map(|s| s.observer.clone())
                .collect()
        };

        if matched.is_empty() {
            debug!(event_type = ?event.event_type(), "published event with no matching observers");
            return;
        }

        let event = Arc::new(event);
        let mut handles = Vec::with_capacity(matched.len());
        for observer in matched {
            let event = Arc::clone(&event);
            handles.push(tokio::spawn(async move {
                let observer_id = observer.id();
                observer.on_event(&event).await;
                observer_id
            }));
        }

        for handle in handles {
            if let Err(join_err) = handle.await {
                warn!(
                    error = %join_err,
                    event_type = ?event.event_type(),
                    "event observer fault isolated; fan-out continues"
                );
            }
        }
    }
}
