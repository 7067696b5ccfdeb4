// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use multiversion_domain::{DomainEvent, EventKind, HostEvent, RunSummary};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::reporting::RunReporter;

/// Event publisher abstraction
pub trait EventPublisher: Send + Sync {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static;
}

/// Receives host notifications of the kinds it subscribed to.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &HostEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait EventSource: Send + Sync {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
}

/// Published events kept for `drain`; older ones are dropped beyond this.
const MAX_RETAINED: usize = 1024;

/// A minimal in-memory event bus. Host notifications are dispatched to
/// subscribers synchronously; the most recent published events are also
/// kept, serialized, until drained.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    published: Arc<Mutex<VecDeque<serde_json::Value>>>,
    next_id: Arc<AtomicU64>,
}

fn recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!(target: "events", what, "event bus mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        recover(&self.published, "published").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        recover(&self.subscriptions, "subscriptions").len()
    }

    fn record(&self, value: serde_json::Value) {
        let mut published = recover(&self.published, "published");
        if published.len() >= MAX_RETAINED {
            published.pop_front();
        }
        published.push_back(value);
    }

    /// Retrieve and clear all captured events
    pub fn drain(&self) -> Vec<serde_json::Value> {
        let mut guard = recover(&self.published, "published");
        Vec::from(std::mem::take(&mut *guard))
    }

    /// Record a host notification and hand it to every matching subscriber.
    pub fn publish_host_event(&self, event: &HostEvent) {
        self.record(json!({
            "name": event.kind.as_str(),
            "occurred_at": event.occurred_at,
            "payload": event.data,
        }));

        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Arc<dyn EventHandler>> = recover(&self.subscriptions, "subscriptions")
            .iter()
            .filter(|sub| sub.kind == event.kind)
            .map(|sub| sub.handler.clone())
            .collect();

        debug!(target: "events", kind = %event.kind, handlers = handlers.len(), "dispatching host event");
        for handler in handlers {
            handler.handle(event);
        }
    }
}

impl EventSource for InMemoryEventBus {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        recover(&self.subscriptions, "subscriptions").push(Subscription { id, kind, handler });
        debug!(target: "events", %kind, "handler subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = recover(&self.subscriptions, "subscriptions");
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        self.record(value);
    }
}

impl RunReporter for InMemoryEventBus {
    fn report(&self, summary: &RunSummary) {
        self.publish(&DomainEvent::new("acquisition.completed", summary.clone()));
    }
}
