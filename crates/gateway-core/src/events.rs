//! The gateway's event bus. Sessions and the orchestrator publish onto a
//! single shared bus; subscribers register against a specific event type or
//! the wildcard (`on(eventType | "*", handler)`) and are invoked
//! synchronously, in registration order. Handler panics are isolated so a
//! broken subscriber can't corrupt gateway or session state.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use gateway_types::{Event, EventType};
use tracing::error;

pub type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` means wildcard: receives every event regardless of type.
    type_filter: Option<EventType>,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a specific event type, or pass `None` for the wildcard.
    /// Returns an id usable with [`EventBus::unsubscribe`].
    pub fn subscribe(&self, type_filter: Option<EventType>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .expect("event bus lock poisoned")
            .push(Subscription {
                id,
                type_filter,
                handler,
            });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions
            .lock()
            .expect("event bus lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Deliver `event` to every matching subscriber, in registration order.
    /// A handler that panics is caught and logged; delivery continues to
    /// the remaining subscribers.
    pub fn publish(&self, event: Event) {
        let subscriptions = self.subscriptions.lock().expect("event bus lock poisoned");
        for sub in subscriptions.iter() {
            let matches = match &sub.type_filter {
                None => true,
                Some(event_type) => *event_type == event.event_type,
            };
            if !matches {
                continue;
            }
            let handler = &sub.handler;
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                error!(
                    event_type = ?event.event_type,
                    session_id = %event.session_id,
                    "event handler panicked, isolating fault"
                );
            }
        }
    }
}
