//! In-process fan-out of transcript and status events.
//!
//! Subscribers live in an arena keyed by integer id; each owns a bounded
//! delivery queue. A slow subscriber never stalls the publisher: on queue
//! overflow the subscriber is disconnected and its stream closes.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::tracker::AgentStatus;
use crate::transcript::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    MessageUpdate(Message),
    StatusChange(AgentStatus),
}

impl BusEvent {
    /// SSE event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageUpdate(_) => "message_update",
            Self::StatusChange(_) => "status_change",
        }
    }
}

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<BusEvent>>,
}

pub struct EventBus {
    inner: Mutex<BusInner>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber. `bootstrap` events (current transcript plus
    /// current status) are enqueued ahead of any live event; the registration
    /// and the bootstrap push happen under one lock so no publication can
    /// interleave.
    pub fn subscribe(&self, bootstrap: Vec<BusEvent>) -> (u64, mpsc::Receiver<BusEvent>) {
        let capacity = self.capacity.max(bootstrap.len() + 1);
        let (tx, rx) = mpsc::channel(capacity);

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        for event in bootstrap {
            // Cannot fail: the queue was sized to hold the whole bootstrap.
            let _ = tx.try_send(event);
        }
        inner.subscribers.insert(id, tx);
        tracing::debug!(target = "agent_console::bus", id, "subscriber attached");
        (id, rx)
    }

    /// Deliver an event to every subscriber. Full or closed queues drop the
    /// subscriber, never the publisher.
    pub fn publish(&self, event: &BusEvent) {
        let targets: Vec<(u64, mpsc::Sender<BusEvent>)> = {
            let inner = self.inner.lock();
            inner
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        target = "agent_console::bus",
                        id,
                        "subscriber queue overrun, disconnecting"
                    );
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.lock();
            for id in dead {
                inner.subscribers.remove(&id);
            }
        }
    }

    /// Detach a subscriber. Safe to call repeatedly and from the subscriber's
    /// own delivery path.
    pub fn remove(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Drop every subscriber; their streams end after draining.
    pub fn close_all(&self) {
        self.inner.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{BusEvent, EventBus};
    use crate::tracker::AgentStatus;
    use crate::transcript::{Message, Role};
    use chrono::Utc;

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            role: Role::Agent,
            content: content.to_string(),
            time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn bootstrap_arrives_before_live_events() {
        let bus = EventBus::new(8);
        let bootstrap = vec![
            BusEvent::MessageUpdate(message("m1", "one")),
            BusEvent::MessageUpdate(message("m2", "two")),
            BusEvent::StatusChange(AgentStatus::Stable),
        ];
        let (_id, mut rx) = bus.subscribe(bootstrap);
        bus.publish(&BusEvent::MessageUpdate(message("m3", "live")));

        match rx.recv().await.unwrap() {
            BusEvent::MessageUpdate(m) => assert_eq!(m.id, "m1"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            BusEvent::MessageUpdate(m) => assert_eq!(m.id, "m2"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            BusEvent::StatusChange(AgentStatus::Stable)
        );
        match rx.recv().await.unwrap() {
            BusEvent::MessageUpdate(m) => assert_eq!(m.id, "m3"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_order_matches_publication_order() {
        let bus = EventBus::new(16);
        let (_id, mut rx) = bus.subscribe(Vec::new());
        for i in 0..10 {
            bus.publish(&BusEvent::MessageUpdate(message("m", &i.to_string())));
        }
        for i in 0..10 {
            match rx.recv().await.unwrap() {
                BusEvent::MessageUpdate(m) => assert_eq!(m.content, i.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected() {
        let bus = EventBus::new(2);
        let (_id, mut rx) = bus.subscribe(Vec::new());
        for i in 0..5 {
            bus.publish(&BusEvent::MessageUpdate(message("m", &i.to_string())));
        }
        assert_eq!(bus.subscriber_count(), 0);

        // The queued prefix is still readable, then the stream closes.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let bus = EventBus::new(2);
        let (_slow, _slow_rx) = bus.subscribe(Vec::new());
        let (_fast, mut fast_rx) = bus.subscribe(Vec::new());

        for i in 0..3 {
            bus.publish(&BusEvent::MessageUpdate(message("m", &i.to_string())));
            // Fast subscriber drains as events arrive.
            assert!(fast_rx.recv().await.is_some());
        }
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let bus = EventBus::new(4);
        let (id, mut rx) = bus.subscribe(Vec::new());
        bus.remove(id);
        bus.remove(id);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let bus = EventBus::new(4);
        let (_a, mut rx_a) = bus.subscribe(Vec::new());
        let (_b, mut rx_b) = bus.subscribe(Vec::new());
        bus.close_all();
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn bootstrap_larger_than_capacity_still_fits() {
        let bus = EventBus::new(2);
        let bootstrap: Vec<BusEvent> = (0..6)
            .map(|i| BusEvent::MessageUpdate(message(&format!("m{i}"), "x")))
            .collect();
        let (_id, mut rx) = bus.subscribe(bootstrap);
        for i in 0..6 {
            match rx.recv().await.unwrap() {
                BusEvent::MessageUpdate(m) => assert_eq!(m.id, format!("m{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
