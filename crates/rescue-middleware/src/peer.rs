//! Direct-send subscribers for the rosbridge WebSocket protocol.
//!
//! The registry stores each connection's send handle and a publish awaits the
//! sends, concurrently and each bounded by the hub's send timeout. A peer whose
//! send fails is unsubscribed from that topic; a peer that does not accept the
//! frame in time is dropped from every topic.
//!
//! Membership is re-checked right before each send, so a peer that left while
//! earlier sends of the same publish were running is skipped. A send that is
//! already in flight when its peer unsubscribes still completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use rescue_types::{BridgeError, SubscriberId};
use serde_json::{Value, json};
use tracing::warn;

use crate::registry::TopicRegistry;

/// How long [`PeerHub::publish`] waits on one peer before dropping it.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound half of a connected peer.
#[async_trait]
pub trait PeerSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), BridgeError>;
}

pub type PeerHandle = Arc<dyn PeerSink>;

/// Build the server → client frame `{"op":"publish","topic":T,"msg":M}`.
pub fn publish_frame(topic: &str, msg: &Value) -> String {
    json!({ "op": "publish", "topic": topic, "msg": msg }).to_string()
}

enum SendOutcome {
    Sent,
    /// Left the topic after the snapshot was taken.
    Skipped,
    Failed(BridgeError),
    TimedOut,
}

pub struct PeerHub {
    registry: TopicRegistry<PeerHandle>,
    send_timeout: Duration,
}

impl PeerHub {
    pub fn new() -> Self {
        Self {
            registry: TopicRegistry::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn subscribe(&self, topic: &str, id: SubscriberId, peer: PeerHandle) -> bool {
        self.registry.subscribe(topic, id, peer)
    }

    pub fn unsubscribe(&self, topic: &str, id: &SubscriberId) -> bool {
        self.registry.unsubscribe(topic, id)
    }

    /// Drop `id` from every topic. Returns how many topics it had joined.
    pub fn disconnect(&self, id: &SubscriberId) -> usize {
        self.registry.remove_everywhere(id)
    }

    /// Send a publish frame for `msg` to every subscriber of `topic`.
    ///
    /// Returns how many peers accepted the frame. Never waits longer than the
    /// send timeout, however many peers are stalled.
    pub async fn publish(&self, topic: &str, msg: &Value) -> usize {
        let peers = self.registry.snapshot(topic);
        if peers.is_empty() {
            return 0;
        }

        let frame = publish_frame(topic, msg);
        let sends = peers.into_iter().map(|(id, peer)| {
            let frame = frame.clone();
            async move {
                if !self.registry.contains(topic, &id) {
                    return (id, SendOutcome::Skipped);
                }
                let outcome = match tokio::time::timeout(self.send_timeout, peer.send_text(frame)).await {
                    Ok(Ok(())) => SendOutcome::Sent,
                    Ok(Err(e)) => SendOutcome::Failed(e),
                    Err(_) => SendOutcome::TimedOut,
                };
                (id, outcome)
            }
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(sends).await {
            match outcome {
                SendOutcome::Sent => delivered += 1,
                SendOutcome::Skipped => {}
                SendOutcome::Failed(e) => {
                    warn!(peer = %id, topic, error = %e, "send failed, dropping peer from topic");
                    self.registry.unsubscribe(topic, &id);
                }
                SendOutcome::TimedOut => {
                    let topics = self.registry.remove_everywhere(&id);
                    warn!(
                        peer = %id,
                        topic,
                        topics,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "peer stalled, dropped from every topic"
                    );
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    pub fn topics_of(&self, id: &SubscriberId) -> Vec<String> {
        self.registry.topics_of(id)
    }
}

impl Default for PeerHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPeer {
        frames: Mutex<Vec<String>>,
        broken: bool,
    }

    #[async_trait]
    impl PeerSink for RecordingPeer {
        async fn send_text(&self, text: String) -> Result<(), BridgeError> {
            if self.broken {
                return Err(BridgeError::Transport("broken pipe".to_string()));
            }
            self.frames.lock().unwrap().push(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = PeerHub::new();
        let a = Arc::new(RecordingPeer::default());
        let b = Arc::new(RecordingPeer::default());
        hub.subscribe("/plan/full", SubscriberId::new(), a.clone());
        hub.subscribe("/plan/full", SubscriberId::new(), b.clone());

        let delivered = hub.publish("/plan/full", &json!({ "data": "[]" })).await;
        assert_eq!(delivered, 2);

        for peer in [&a, &b] {
            let frames = peer.frames.lock().unwrap();
            let frame: Value = serde_json::from_str(&frames[0]).unwrap();
            assert_eq!(frame["op"], "publish");
            assert_eq!(frame["topic"], "/plan/full");
            assert_eq!(frame["msg"]["data"], "[]");
        }
    }

    #[tokio::test]
    async fn publish_to_empty_topic_is_noop() {
        let hub = PeerHub::new();
        assert_eq!(hub.publish("/nobody", &json!({})).await, 0);
    }

    #[tokio::test]
    async fn failing_peer_is_dropped_from_topic() {
        let hub = PeerHub::new();
        let broken_id = SubscriberId::new();
        let broken = Arc::new(RecordingPeer {
            broken: true,
            ..Default::default()
        });
        let healthy = Arc::new(RecordingPeer::default());
        hub.subscribe("/subtask/current", broken_id, broken);
        hub.subscribe("/subtask/current", SubscriberId::new(), healthy.clone());

        let delivered = hub.publish("/subtask/current", &json!({ "data": "step" })).await;
        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count("/subtask/current"), 1);
        assert!(hub.topics_of(&broken_id).is_empty());
        assert_eq!(healthy.frames.lock().unwrap().len(), 1);
    }

    /// Never completes a send, like a socket whose peer stopped reading.
    struct StalledPeer;

    #[async_trait]
    impl PeerSink for StalledPeer {
        async fn send_text(&self, _text: String) -> Result<(), BridgeError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_is_dropped_after_send_timeout() {
        let hub = PeerHub::new().with_send_timeout(Duration::from_millis(200));
        let stalled_id = SubscriberId::new();
        let stalled: PeerHandle = Arc::new(StalledPeer);
        let healthy = Arc::new(RecordingPeer::default());
        hub.subscribe("/plan/full", stalled_id, Arc::clone(&stalled));
        hub.subscribe("/subtask/current", stalled_id, stalled);
        hub.subscribe("/plan/full", SubscriberId::new(), healthy.clone());
        hub.subscribe("/subtask/current", SubscriberId::new(), healthy.clone());

        let started = tokio::time::Instant::now();
        assert_eq!(hub.publish("/plan/full", &json!({ "data": "[]" })).await, 1);
        assert!(started.elapsed() <= Duration::from_millis(250));
        assert!(hub.topics_of(&stalled_id).is_empty());

        // Later publishes no longer wait on it.
        let started = tokio::time::Instant::now();
        assert_eq!(hub.publish("/subtask/current", &json!({ "data": "step" })).await, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(healthy.frames.lock().unwrap().len(), 2);
    }

    /// Unsubscribes another peer from the topic while a publish is running.
    struct Unsubscriber {
        hub: Arc<PeerHub>,
        victim: SubscriberId,
        frames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PeerSink for Unsubscriber {
        async fn send_text(&self, text: String) -> Result<(), BridgeError> {
            self.hub.unsubscribe("/t", &self.victim);
            self.frames.lock().unwrap().push(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn peer_removed_during_publish_gets_nothing() {
        let hub = Arc::new(PeerHub::new());
        let (a_id, b_id) = (SubscriberId::new(), SubscriberId::new());
        let a = Arc::new(Unsubscriber {
            hub: Arc::clone(&hub),
            victim: b_id,
            frames: Mutex::default(),
        });
        let b = Arc::new(Unsubscriber {
            hub: Arc::clone(&hub),
            victim: a_id,
            frames: Mutex::default(),
        });
        hub.subscribe("/t", a_id, a.clone());
        hub.subscribe("/t", b_id, b.clone());

        // Whichever peer is sent to first removes the other before its turn.
        assert_eq!(hub.publish("/t", &json!({ "data": 1 })).await, 1);
        let received = a.frames.lock().unwrap().len() + b.frames.lock().unwrap().len();
        assert_eq!(received, 1);
        assert_eq!(hub.subscriber_count("/t"), 1);
    }

    #[test]
    fn disconnect_sweeps_all_topics() {
        let hub = PeerHub::new();
        let id = SubscriberId::new();
        let peer: PeerHandle = Arc::new(RecordingPeer::default());
        hub.subscribe("/plan/full", id, Arc::clone(&peer));
        hub.subscribe("/subtask/current", id, peer);

        assert_eq!(hub.disconnect(&id), 2);
        assert_eq!(hub.subscriber_count("/plan/full"), 0);
    }
}
