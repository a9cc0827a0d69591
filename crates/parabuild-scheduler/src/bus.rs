//! Synchronous event bus.

use parabuild_core::Event;
use std::sync::Mutex;
use tracing::trace;

use crate::lock;

/// Receives every event published on an [`EventBus`].
///
/// Subscribers run on the publisher's task and must not publish themselves.
pub trait Subscriber: Send {
    fn on_event(&mut self, event: &Event);
}

impl<F> Subscriber for F
where
    F: FnMut(&Event) + Send,
{
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Fans events out to subscribers in subscription order.
///
/// `publish` returns only after every subscriber has seen the event, so
/// observers see events in exactly the order they were published.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Box<dyn Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) {
        lock(&self.subscribers).push(Box::new(subscriber));
    }

    pub fn publish(&self, event: Event) {
        trace!(event = event.name(), "Publishing event");
        let mut subscribers = lock(&self.subscribers);
        for subscriber in subscribers.iter_mut() {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
