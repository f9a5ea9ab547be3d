//! [`Broker`] – the process-wide shared state of the bridge.
//!
//! Created once at startup and handed by `Arc` to every connection handler
//! and to the ingress gateway.

use std::sync::Arc;

use crate::fanout::{DEFAULT_QUEUE_CAPACITY, EventHub};
use crate::frame_cache::FrameCache;
use crate::peer::PeerHub;

pub struct Broker {
    events: EventHub,
    peers: PeerHub,
    frames: Arc<FrameCache>,
}

impl Broker {
    /// Create a broker whose streaming subscribers get `queue_capacity`
    /// queued events each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            events: EventHub::new(queue_capacity),
            peers: PeerHub::new(),
            frames: Arc::new(FrameCache::new()),
        }
    }

    /// Queue-backed subscribers (SSE).
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Direct-send subscribers (rosbridge WebSocket).
    pub fn peers(&self) -> &PeerHub {
        &self.peers
    }

    pub fn frames(&self) -> &Arc<FrameCache> {
        &self.frames
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
