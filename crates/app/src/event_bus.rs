//! Broadcast fan-out of engine events to in-process listeners.

use std::future::Future;

use tokio::sync::broadcast;

use gattlink_domain::event::Event;

use crate::ports::{EventSink, SinkError};

/// [`EventSink`] that hands every engine event to all current listeners.
///
/// A listener only sees events published after it called
/// [`subscribe`](Self::subscribe). With no listener at all, events are
/// discarded and delivery still succeeds; a listener that falls more than
/// `capacity` events behind observes a lag instead of blocking the engine.
#[derive(Debug, Clone)]
pub struct InProcessEventBus {
    sender: broadcast::Sender<Event>,
}

impl InProcessEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new listener.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for InProcessEventBus {
    fn deliver(&self, event: Event) -> impl Future<Output = Result<(), SinkError>> + Send {
        let name = event.name();
        match self.sender.send(event) {
            Ok(listeners) => tracing::trace!(event = name, listeners, "event published"),
            Err(_) => tracing::trace!(event = name, "no listener, event discarded"),
        }
        async { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(address: &str) -> Event {
        Event::Connected {
            address: address.into(),
        }
    }

    #[tokio::test]
    async fn should_deliver_event_to_subscriber() {
        let bus = InProcessEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.deliver(connected("AA:01")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), connected("AA:01"));
    }

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = InProcessEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.deliver(connected("AA:01")).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), connected("AA:01"));
        assert_eq!(rx2.recv().await.unwrap(), connected("AA:01"));
    }

    #[test]
    fn should_count_listeners() {
        let bus = InProcessEventBus::new(4);
        assert_eq!(bus.listeners(), 0);
        let rx = bus.subscribe();
        assert_eq!(bus.listeners(), 1);
        drop(rx);
        assert_eq!(bus.listeners(), 0);
    }

    #[tokio::test]
    async fn should_accept_zero_capacity() {
        let bus = InProcessEventBus::new(0);
        let mut rx = bus.subscribe();
        bus.deliver(connected("AA:01")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), connected("AA:01"));
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = InProcessEventBus::new(16);
        assert!(bus.deliver(connected("AA:01")).await.is_ok());
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscription() {
        let bus = InProcessEventBus::new(16);
        bus.deliver(connected("AA:01")).await.unwrap();

        let mut rx = bus.subscribe();
        bus.deliver(connected("BB:02")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), connected("BB:02"));
    }
}
