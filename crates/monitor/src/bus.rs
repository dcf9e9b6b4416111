//! Subscription and notification fan-out.
//!
//! The [`NotificationBus`] delivers [`ChangeEvent`]s from the registry
//! to subscribers over bounded mpsc channels. Each subscriber carries a
//! [`SubscriptionFilter`] evaluated at publish time, so consumers only
//! wake for events they care about.
//!
//! Delivery is best-effort per subscriber: a full channel drops the
//! event for that subscriber only, never blocking the registry or other
//! subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use metrics::counter;
use tokio::sync::mpsc;

use dockwatch_core::event::ChangeEvent;
use dockwatch_core::metrics::{EVENTS_TOTAL, LABEL_HOST};
use dockwatch_core::types::{AttributeClass, ContainerId};

/// Publish-time event filter.
///
/// `None` fields match everything; an event passes when every set
/// field matches.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Restrict to these containers.
    pub containers: Option<HashSet<ContainerId>>,
    /// Restrict to events touching these attribute classes.
    pub classes: Option<Vec<AttributeClass>>,
}

impl SubscriptionFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single container.
    pub fn container(id: ContainerId) -> Self {
        Self {
            containers: Some(HashSet::from([id])),
            classes: None,
        }
    }

    /// Restrict to attribute classes.
    pub fn classes(classes: Vec<AttributeClass>) -> Self {
        Self {
            containers: None,
            classes: Some(classes),
        }
    }

    /// Whether an event passes this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(containers) = &self.containers
            && !containers.contains(&event.container)
        {
            return false;
        }
        if let Some(classes) = &self.classes
            && !event.matches_classes(classes)
        {
            return false;
        }
        true
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

struct BusInner {
    host: String,
    capacity: usize,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
}

/// Change event fan-out hub for one host.
///
/// Cloning is cheap; all clones share the subscriber table.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    /// Creates a bus with the given per-subscriber channel capacity.
    pub fn new(host: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                host: host.into(),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a subscriber and returns its handle plus the receiving
    /// end of its channel.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> (SubscriptionHandle, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner());
            subscribers.insert(id, Subscriber { filter, tx });
        }
        let handle = SubscriptionHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        };
        (handle, rx)
    }

    /// Publishes one event to every matching subscriber.
    ///
    /// Subscribers with a full channel miss this event; publishing
    /// never blocks.
    pub fn publish(&self, event: &ChangeEvent) {
        counter!(EVENTS_TOTAL, LABEL_HOST => self.inner.host.clone()).increment(1);

        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner());
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.filter.matches(event) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) =
                subscriber.tx.try_send(event.clone())
            {
                tracing::warn!(
                    host = %self.inner.host,
                    subscriber = id,
                    container = %event.container,
                    "subscriber channel full, dropping event"
                );
            }
        }
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Owned subscription registration.
///
/// Dropping the handle unsubscribes. Once [`unsubscribe`](Self::unsubscribe)
/// (or the drop) returns, no further events are delivered to the
/// subscriber's channel: removal takes the same lock publishing reads
/// under, so any in-flight publish has already finished.
pub struct SubscriptionHandle {
    id: u64,
    inner: Weak<BusInner>,
}

impl SubscriptionHandle {
    /// Removes the subscription.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut subscribers = inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subscribers.remove(&self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.remove();
    }
}
