//! The seam between the bridge and the external robotics bus.
//!
//! The bridge only ever needs two things from the bus: publish a string on a
//! topic, and subscribe to a topic as a stream of raw payloads. Both are
//! captured by [`BusClient`].
//!
//! [`LocalBus`] is the in-process implementation, built on
//! [`tokio::sync::broadcast`] channels (one per topic) so every subscriber
//! receives every payload without any single subscriber blocking the others.
//! It is what the bridge runs on when no robot is attached, and what the
//! tests feed camera frames through.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rescue_types::BridgeError;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-topic channel capacity (payloads buffered before a slow
/// subscriber starts lagging).
const DEFAULT_CAPACITY: usize = 64;

/// Narrow client interface to the external pub/sub bus.
///
/// Implementations are best-effort: callers log failures and carry on.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish `payload` as a `std_msgs/String` on `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;

    /// Subscribe to `topic`, yielding each raw payload.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UpstreamUnavailable`] when the bus cannot deliver this
    /// topic at all.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>, BridgeError>;
}

/// In-process topic bus. Cheap to share behind an `Arc`.
pub struct LocalBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish raw bytes on `topic`.
    ///
    /// Returns the number of live subscribers that were handed the payload;
    /// `0` when nobody is listening (a normal condition, not an error).
    pub fn publish_bytes(&self, topic: &str, payload: Bytes) -> usize {
        self.sender(topic).send(payload).unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusClient for LocalBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        let receivers = self.publish_bytes(topic, Bytes::copy_from_slice(payload.as_bytes()));
        debug!(topic, receivers, "local bus publish");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>, BridgeError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, topic))),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %topic, lagged_by = n, "local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
