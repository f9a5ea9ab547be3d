//! rosbridge-style WebSocket pub/sub.
//!
//! Clients speak the subset of the rosbridge v2 protocol that web dashboards
//! use: `subscribe`, `unsubscribe`, `advertise`, `unadvertise` and `publish`.
//! The server answers only with `publish` frames for subscribed topics.
//!
//! ```text
//! client → {"op":"subscribe","topic":"/plan/full"}
//! client → {"op":"publish","topic":"/mission/goal","msg":{"data":"build a tower"}}
//! server → {"op":"publish","topic":"/plan/full","msg":{"data":"[\"Locate objects for: build a tower\", ...]"}}
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use rescue_middleware::{PeerHandle, PeerSink};
use rescue_types::{BridgeError, SubscriberId};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;

/// One inbound client operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Advertise {
        topic: Option<String>,
    },
    Unadvertise {
        topic: Option<String>,
    },
    Publish {
        topic: String,
        #[serde(default)]
        msg: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Outbound half of a WebSocket: a bounded queue drained by the
/// connection's writer, so a publish never waits on the socket.
pub struct WsPeer {
    tx: mpsc::Sender<String>,
}

impl WsPeer {
    /// A peer with room for `capacity` unsent frames, and the receiver its
    /// writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PeerSink for WsPeer {
    async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        self.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => BridgeError::Transport("outbound queue full".to_string()),
            TrySendError::Closed(_) => BridgeError::Transport("connection closed".to_string()),
        })
    }
}

/// Write queued frames to `sink` until the queue closes or a write fails.
pub async fn write_outbound<S>(mut outbound: mpsc::Receiver<String>, mut sink: S) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    while let Some(text) = outbound.recv().await {
        sink.send(Message::Text(text.into())).await?;
    }
    Ok(())
}

/// Per-connection protocol state. Leaves every topic when dropped.
pub struct RosbridgeSession {
    id: SubscriberId,
    peer: PeerHandle,
    gateway: Gateway,
}

impl RosbridgeSession {
    pub fn new(gateway: Gateway, peer: PeerHandle) -> Self {
        Self {
            id: SubscriberId::new(),
            peer,
            gateway,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Apply one inbound text frame.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ClientRequest`] for a frame that is not a valid
    /// operation. The connection stays open either way.
    pub async fn handle_text(&self, text: &str) -> Result<(), BridgeError> {
        let op: ClientOp = serde_json::from_str(text)
            .map_err(|e| BridgeError::ClientRequest(format!("bad rosbridge frame: {e}")))?;
        let peers = self.gateway.broker().peers();

        match op {
            ClientOp::Subscribe { topic } => {
                peers.subscribe(&topic, self.id, Arc::clone(&self.peer));
                debug!(session = %self.id, topic = %topic, "subscribe");
            }
            ClientOp::Unsubscribe { topic } => {
                peers.unsubscribe(&topic, &self.id);
                debug!(session = %self.id, topic = %topic, "unsubscribe");
            }
            ClientOp::Advertise { topic } | ClientOp::Unadvertise { topic } => {
                debug!(session = %self.id, topic = ?topic, "advertise acknowledged");
            }
            ClientOp::Publish { topic, msg } => {
                self.gateway.on_publish(&topic, &msg).await?;
            }
            ClientOp::Unknown => {
                debug!(session = %self.id, frame = text, "unsupported op ignored");
            }
        }
        Ok(())
    }
}

impl Drop for RosbridgeSession {
    fn drop(&mut self) {
        let topics = self.gateway.broker().peers().disconnect(&self.id);
        debug!(session = %self.id, topics, "session closed");
    }
}

/// Run a rosbridge session on an upgraded WebSocket until the client goes
/// away or its socket stops accepting writes.
pub async fn serve(socket: WebSocket, peer_addr: SocketAddr, gateway: Gateway) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (peer, outbound) = WsPeer::channel(gateway.broker().events().capacity());
    let session = RosbridgeSession::new(gateway, Arc::new(peer));
    info!(peer = %peer_addr, session = %session.id(), "rosbridge client connected");

    let read = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = session.handle_text(text.as_str()).await {
                        warn!(peer = %peer_addr, error = %e, "rosbridge frame dropped");
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %peer_addr, error = %e, "ws read error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = read => {}
        written = write_outbound(outbound, ws_tx) => log_write_end(peer_addr, written),
    }

    info!(peer = %peer_addr, session = %session.id(), "rosbridge client disconnected");
}

fn log_write_end<E: Display>(peer_addr: SocketAddr, written: Result<(), E>) {
    if let Err(e) = written {
        debug!(peer = %peer_addr, error = %e, "ws write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescue_middleware::{Broker, LocalBus};
    use rescue_types::{DONE_MARKER, topics};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPeer {
        frames: std::sync::Mutex<Vec<Value>>,
    }

    impl RecordingPeer {
        fn frames(&self) -> Vec<Value> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerSink for RecordingPeer {
        async fn send_text(&self, text: String) -> Result<(), BridgeError> {
            self.frames.lock().unwrap().push(serde_json::from_str(&text).unwrap());
            Ok(())
        }
    }

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(Broker::default()), Arc::new(LocalBus::default()))
            .with_step_delay(Duration::ZERO)
    }

    fn session(gw: &Gateway) -> (RosbridgeSession, Arc<RecordingPeer>) {
        let peer = Arc::new(RecordingPeer::default());
        (RosbridgeSession::new(gw.clone(), peer.clone()), peer)
    }

    #[test]
    fn parses_client_ops() {
        let op: ClientOp = serde_json::from_str(r#"{"op":"subscribe","topic":"/t"}"#).unwrap();
        assert_eq!(op, ClientOp::Subscribe { topic: "/t".into() });

        let op: ClientOp =
            serde_json::from_str(r#"{"op":"advertise","topic":"/t","type":"std_msgs/String"}"#)
                .unwrap();
        assert_eq!(op, ClientOp::Advertise { topic: Some("/t".into()) });

        let op: ClientOp = serde_json::from_str(r#"{"op":"publish","topic":"/t"}"#).unwrap();
        assert_eq!(op, ClientOp::Publish { topic: "/t".into(), msg: Value::Null });

        let op: ClientOp = serde_json::from_str(r#"{"op":"call_service","service":"/x"}"#).unwrap();
        assert_eq!(op, ClientOp::Unknown);
    }

    #[tokio::test]
    async fn advertise_then_publish_routes_to_subscriber() {
        let gw = gateway();
        let (publisher, publisher_peer) = session(&gw);
        let (listener, listener_peer) = session(&gw);

        listener.handle_text(r#"{"op":"subscribe","topic":"/chatter"}"#).await.unwrap();
        publisher
            .handle_text(r#"{"op":"advertise","topic":"/chatter","type":"std_msgs/String"}"#)
            .await
            .unwrap();
        assert!(publisher_peer.frames().is_empty());

        publisher
            .handle_text(r#"{"op":"publish","topic":"/chatter","msg":{"data":"hello"}}"#)
            .await
            .unwrap();

        assert_eq!(
            listener_peer.frames(),
            vec![json!({ "op": "publish", "topic": "/chatter", "msg": { "data": "hello" } })]
        );
        assert!(publisher_peer.frames().is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_are_client_errors() {
        let gw = gateway();
        let (s, peer) = session(&gw);

        for bad in ["not json", r#"{"topic":"/t"}"#, r#"{"op":"subscribe"}"#] {
            let err = s.handle_text(bad).await.unwrap_err();
            assert!(matches!(err, BridgeError::ClientRequest(_)), "{bad}");
        }
        // Still usable afterwards.
        s.handle_text(r#"{"op":"subscribe","topic":"/t"}"#).await.unwrap();
        assert_eq!(gw.broker().peers().subscriber_count("/t"), 1);
        assert!(peer.frames().is_empty());
    }

    #[tokio::test]
    async fn unknown_op_is_ignored() {
        let gw = gateway();
        let (s, peer) = session(&gw);
        s.handle_text(r#"{"op":"call_service","service":"/reset"}"#).await.unwrap();
        assert!(peer.frames().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let gw = gateway();
        let (s, peer) = session(&gw);
        s.handle_text(r#"{"op":"subscribe","topic":"/t"}"#).await.unwrap();
        s.handle_text(r#"{"op":"unsubscribe","topic":"/t"}"#).await.unwrap();
        // Unsubscribing twice is fine.
        s.handle_text(r#"{"op":"unsubscribe","topic":"/t"}"#).await.unwrap();

        gw.broker().peers().publish("/t", &json!({ "data": 1 })).await;
        assert!(peer.frames().is_empty());
    }

    #[tokio::test]
    async fn goal_publish_drives_plan_and_subtasks() {
        let gw = gateway();
        let (s, peer) = session(&gw);
        s.handle_text(r#"{"op":"subscribe","topic":"/plan/full"}"#).await.unwrap();
        s.handle_text(r#"{"op":"subscribe","topic":"/subtask/current"}"#).await.unwrap();
        s.handle_text(r#"{"op":"publish","topic":"/mission/goal","msg":{"data":"build a tower"}}"#)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while peer.frames().last().map(|f| f["msg"]["data"].clone()) != Some(json!(DONE_MARKER)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let frames = peer.frames();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0]["topic"], topics::PLAN);
        assert_eq!(frames[1]["msg"]["data"], "Locate objects for: build a tower");
    }

    #[tokio::test]
    async fn dropping_session_leaves_every_topic() {
        let gw = gateway();
        let (s, _peer) = session(&gw);
        let id = s.id();
        s.handle_text(r#"{"op":"subscribe","topic":"/a"}"#).await.unwrap();
        s.handle_text(r#"{"op":"subscribe","topic":"/b"}"#).await.unwrap();
        assert_eq!(gw.broker().peers().topics_of(&id).len(), 2);

        drop(s);

        assert!(gw.broker().peers().topics_of(&id).is_empty());
        assert_eq!(gw.broker().peers().subscriber_count("/a"), 0);
    }

    #[tokio::test]
    async fn ws_peer_queue_full_fails_without_waiting() {
        let (peer, _outbound) = WsPeer::channel(1);
        peer.send_text("one".to_string()).await.unwrap();
        let err = peer.send_text("two".to_string()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn ws_peer_after_writer_exit_fails() {
        let (peer, outbound) = WsPeer::channel(4);
        drop(outbound);
        assert!(peer.send_text("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn writer_drains_queue_in_order() {
        let (peer, outbound) = WsPeer::channel(4);
        peer.send_text("a".to_string()).await.unwrap();
        peer.send_text("b".to_string()).await.unwrap();
        drop(peer);

        let mut written: Vec<Message> = Vec::new();
        write_outbound(outbound, &mut written).await.unwrap();

        let texts: Vec<String> = written
            .into_iter()
            .map(|m| match m {
                Message::Text(t) => t.as_str().to_string(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(texts, ["a", "b"]);
    }

    #[tokio::test]
    async fn full_ws_peer_is_dropped_from_topic() {
        let gw = gateway();
        let (peer, _outbound) = WsPeer::channel(1);
        let s = RosbridgeSession::new(gw.clone(), Arc::new(peer));
        s.handle_text(r#"{"op":"subscribe","topic":"/chatter"}"#).await.unwrap();

        let peers = gw.broker().peers();
        assert_eq!(peers.publish("/chatter", &json!({ "data": 1 })).await, 1);
        // Nobody drains the queue; the next publish fails fast.
        assert_eq!(peers.publish("/chatter", &json!({ "data": 2 })).await, 0);
        assert_eq!(peers.subscriber_count("/chatter"), 0);
    }
}
