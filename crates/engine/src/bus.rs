//! In-process pub/sub bus
//!
//! A channel is an ordered listener list. Publication delivers
//! synchronously in subscription order, between the persistence step and
//! the operation's completion — a slow subscriber delays the caller, by
//! design of the delivery contract. Listener panics are caught and logged;
//! they never abort the publishing operation.
//!
//! Unsubscribing removes the listener and eagerly drops the channel entry
//! once its list is empty.

use bri_core::ChangeEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    channels: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_token: AtomicU64,
}

/// Channel-keyed fan-out for change events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener on a channel.
    ///
    /// The returned [`Subscription`] removes the listener when
    /// [`Subscription::unsubscribe`] is called; dropping it without
    /// unsubscribing leaves the listener registered.
    pub fn subscribe(
        &self,
        channel: &str,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((token, Arc::new(listener)));
        Subscription {
            inner: Arc::clone(&self.inner),
            channel: channel.to_string(),
            token,
        }
    }

    /// Deliver an event to every listener on a channel, in order.
    pub fn publish(&self, channel: &str, event: &ChangeEvent) {
        let listeners: Vec<Listener> = {
            let channels = self.inner.channels.lock();
            match channels.get(channel) {
                Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    target: "bri::bus",
                    channel,
                    target_id = %event.target,
                    "subscriber panicked; continuing delivery"
                );
            }
        }
    }

    /// Number of listeners currently registered on a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

/// Handle to a registered listener.
pub struct Subscription {
    inner: Arc<BusInner>,
    channel: String,
    token: u64,
}

impl Subscription {
    /// Remove the listener from its channel.
    pub fn unsubscribe(self) {
        let mut channels = self.inner.channels.lock();
        if let Some(entries) = channels.get_mut(&self.channel) {
            entries.retain(|(token, _)| *token != self.token);
            if entries.is_empty() {
                channels.remove(&self.channel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bri_core::Action;
    use parking_lot::Mutex as PMutex;

    fn event(target: &str) -> ChangeEvent {
        ChangeEvent::new(Action::Add, target)
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(PMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe("db:sub:user", move |_| order.lock().push(tag));
        }

        bus.publish("db:sub:user", &event("USER_a"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_channel_isolation() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        bus.subscribe("db:sub:user", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish("db:sub:post", &event("POST_a"));
        assert_eq!(count.load(Ordering::Relaxed), 0);

        bus.publish("db:sub:user", &event("USER_a"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsubscribe_and_eager_cleanup() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        let sub = bus.subscribe("db:sub:user", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(bus.listener_count("db:sub:user"), 1);

        sub.unsubscribe();
        assert_eq!(bus.listener_count("db:sub:user"), 0);

        bus.publish("db:sub:user", &event("USER_a"));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        bus.subscribe("db:sub:user", |_| panic!("listener bug"));
        let c = Arc::clone(&count);
        bus.subscribe("db:sub:user", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish("db:sub:user", &event("USER_a"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_payload_reaches_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(PMutex::new(None));

        let s = Arc::clone(&seen);
        bus.subscribe("db:sub:user", move |e| {
            *s.lock() = Some(e.clone());
        });

        let mut published = event("USER_a");
        published.tag = Some("import".to_string());
        bus.publish("db:sub:user", &published);

        assert_eq!(seen.lock().clone(), Some(published));
    }
}
