//! Bounded per-subscriber fan-out queues.
//!
//! Every streaming connection owns one [`Subscription`]: a bounded
//! [`tokio::sync::mpsc`] queue registered on one or more topics of the
//! [`EventHub`]'s [`TopicRegistry`].
//!
//! Publishing never blocks. A subscriber whose queue is full is evicted: it is
//! removed from every topic and its eviction signal fires so the connection
//! loop ends without draining what is left in the queue.
//!
//! Dropping a [`Subscription`] deregisters it, whichever way the connection
//! loop exited.

use std::sync::Arc;
use std::time::Duration;

use rescue_types::{StreamEvent, SubscriberId};
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::registry::{Delivery, TopicRegistry};

/// Queue capacity used by [`EventHub::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Registry-side half of a subscription.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<StreamEvent>,
    evicted: Arc<Notify>,
}

/// Fan-out hub for `(event_type, payload)` streams.
pub struct EventHub {
    registry: Arc<TopicRegistry<QueueHandle>>,
    capacity: usize,
}

impl EventHub {
    /// Create a hub whose subscribers each get a queue of `capacity` events.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(TopicRegistry::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new subscriber on every topic in `topics`.
    pub fn open(&self, topics: &[&str]) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let evicted = Arc::new(Notify::new());
        let id = SubscriberId::new();
        let handle = QueueHandle {
            tx,
            evicted: Arc::clone(&evicted),
        };

        for topic in topics {
            self.registry.subscribe(topic, id, handle.clone());
        }
        debug!(subscriber = %id, ?topics, "subscription opened");

        Subscription {
            id,
            rx,
            evicted,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Offer `event` to every subscriber of `topic`.
    ///
    /// Returns the number of queues that accepted it. Zero subscribers is a
    /// normal condition, not an error.
    pub fn publish(&self, topic: &str, event: StreamEvent) -> usize {
        let mut evicted = Vec::new();
        let report = self.registry.deliver(topic, |id, handle| {
            match handle.tx.try_send(event.clone()) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => {
                    handle.evicted.notify_one();
                    evicted.push(*id);
                    Delivery::Remove
                }
                // Receiver already gone; the guard is mid-drop.
                Err(TrySendError::Closed(_)) => Delivery::Remove,
            }
        });

        for id in evicted {
            warn!(subscriber = %id, topic, capacity = self.capacity, "queue full, subscriber evicted");
        }
        report.delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    pub fn registry(&self) -> &TopicRegistry<QueueHandle> {
        &self.registry
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// What woke a [`Subscription::next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// The next queued event, in FIFO order.
    Event(StreamEvent),
    /// Nothing arrived within the idle timeout; send a keepalive.
    Idle,
    /// The subscriber fell behind and was dropped by the hub.
    Evicted,
    /// The subscriber is no longer registered on any topic.
    Closed,
}

/// Connection-side half of a subscription. Deregisters on drop.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<StreamEvent>,
    evicted: Arc<Notify>,
    registry: Arc<TopicRegistry<QueueHandle>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Eviction takes priority over queued events.
    pub async fn recv(&mut self) -> Wake {
        tokio::select! {
            biased;
            _ = self.evicted.notified() => Wake::Evicted,
            item = self.rx.recv() => match item {
                Some(event) => Wake::Event(event),
                None => Wake::Closed,
            },
        }
    }

    /// [`recv`](Self::recv), giving up with [`Wake::Idle`] after `idle`.
    pub async fn next(&mut self, idle: Duration) -> Wake {
        tokio::time::timeout(idle, self.recv())
            .await
            .unwrap_or(Wake::Idle)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let removed = self.registry.remove_everywhere(&self.id);
        debug!(subscriber = %self.id, topics = removed, "subscription closed");
    }
}
