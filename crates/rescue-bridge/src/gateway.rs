//! Ingress gateway: goal submissions, client publishes and camera frames.
//!
//! A goal runs as its own Tokio task: the prompt is forwarded to the bus
//! (best effort), a plan is obtained from the [`Planner`], and progress is
//! broadcast through a [`ProgressSink`] as one `plan` event, one `subtask`
//! event per step and a closing `Done.`.
//!
//! Goals from `POST /goal` report over SSE; goals published on the rosbridge
//! WebSocket report as rosbridge publishes. Concurrent goals are not
//! serialised and their events interleave on the shared topics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::StreamExt;
use rescue_middleware::{Broker, BusClient};
use rescue_types::{BridgeError, DONE_MARKER, StreamEvent, topics};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::planner::{PlaceholderPlanner, Planner};

/// Log every this many camera frames after the first.
const FRAME_LOG_INTERVAL: u64 = 300;

/// Where a running goal reports its progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// The full plan, as a JSON array string.
    async fn plan(&self, steps_json: &str);
    /// One step, or the final `Done.` marker.
    async fn subtask(&self, text: &str);
}

/// Reports to SSE subscribers through the event hub.
pub struct SseProgress {
    broker: Arc<Broker>,
}

#[async_trait]
impl ProgressSink for SseProgress {
    async fn plan(&self, steps_json: &str) {
        let n = self
            .broker
            .events()
            .publish(topics::PLAN, StreamEvent::new("plan", steps_json));
        debug!(receivers = n, "plan broadcast");
    }

    async fn subtask(&self, text: &str) {
        let n = self
            .broker
            .events()
            .publish(topics::SUBTASK, StreamEvent::new("subtask", text));
        debug!(receivers = n, subtask = text, "subtask broadcast");
    }
}

/// Reports to rosbridge peers as `std_msgs/String` publishes.
pub struct RosbridgeProgress {
    broker: Arc<Broker>,
}

#[async_trait]
impl ProgressSink for RosbridgeProgress {
    async fn plan(&self, steps_json: &str) {
        self.broker
            .peers()
            .publish(topics::PLAN, &json!({ "data": steps_json }))
            .await;
    }

    async fn subtask(&self, text: &str) {
        self.broker
            .peers()
            .publish(topics::SUBTASK, &json!({ "data": text }))
            .await;
    }
}

/// Extract the prompt from a `POST /goal` body.
///
/// A JSON object yields its `prompt` string (empty when absent). Anything
/// that is not a JSON object is taken verbatim as the prompt.
pub fn parse_goal_prompt(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("prompt") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Decode the `data` field of a camera message: base64 text (rosbridge's
/// encoding of `uint8[]`) or a plain array of byte values.
fn decode_frame_data(data: &Value) -> Option<Bytes> {
    match data {
        Value::String(s) => STANDARD.decode(s).ok().map(Bytes::from),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Bytes::from),
        _ => None,
    }
}

#[derive(Clone)]
pub struct Gateway {
    broker: Arc<Broker>,
    bus: Arc<dyn BusClient>,
    planner: Arc<dyn Planner>,
    step_delay: Duration,
    camera_topic: String,
}

impl Gateway {
    pub fn new(broker: Arc<Broker>, bus: Arc<dyn BusClient>) -> Self {
        let defaults = BridgeConfig::default();
        Self {
            broker,
            bus,
            planner: Arc::new(PlaceholderPlanner),
            step_delay: defaults.step_delay,
            camera_topic: defaults.camera_topic,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_camera_topic(mut self, topic: impl Into<String>) -> Self {
        self.camera_topic = topic.into();
        self
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn camera_topic(&self) -> &str {
        &self.camera_topic
    }

    /// Accept a goal from `POST /goal` and start its workflow in the
    /// background, reporting over SSE.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ClientRequest`] for an empty prompt; nothing is
    /// broadcast in that case.
    pub fn submit_goal(&self, prompt: &str) -> Result<JoinHandle<()>, BridgeError> {
        if prompt.is_empty() {
            return Err(BridgeError::ClientRequest("empty prompt".to_string()));
        }
        let sink = SseProgress {
            broker: Arc::clone(&self.broker),
        };
        Ok(self.spawn_workflow(prompt.to_string(), sink))
    }

    /// Handle a rosbridge `publish` from a WebSocket client.
    ///
    /// The message is relayed to the topic's current subscribers. A goal
    /// additionally starts a workflow reported over rosbridge, and a camera
    /// message updates the frame cache.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ClientRequest`] when a goal publish carries no prompt.
    pub async fn on_publish(
        &self,
        topic: &str,
        msg: &Value,
    ) -> Result<Option<JoinHandle<()>>, BridgeError> {
        let relayed = self.broker.peers().publish(topic, msg).await;
        debug!(topic, relayed, "client publish relayed");

        if topic == topics::GOAL {
            let prompt = match msg.get("data") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                _ => return Err(BridgeError::ClientRequest("empty prompt".to_string())),
            };
            let sink = RosbridgeProgress {
                broker: Arc::clone(&self.broker),
            };
            return Ok(Some(self.spawn_workflow(prompt, sink)));
        }

        if topic == self.camera_topic {
            match msg.get("data").and_then(decode_frame_data) {
                Some(frame) => {
                    self.ingest_frame(frame);
                }
                None => warn!(topic, "camera publish without decodable data"),
            }
        }
        Ok(None)
    }

    /// Overwrite the cached camera frame and wake MJPEG clients.
    pub fn ingest_frame(&self, frame: Bytes) -> u64 {
        let size = frame.len();
        let seq = self.broker.frames().publish(frame);
        if seq == 1 {
            info!(bytes = size, "first camera frame received");
        } else if seq % FRAME_LOG_INTERVAL == 0 {
            info!(frames = seq, "camera frames received");
        }
        seq
    }

    /// Feed the frame cache from the bus camera topic until the stream ends.
    ///
    /// A bus that cannot deliver the topic only disables the camera feed.
    pub fn spawn_camera_ingest(&self) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let topic = gateway.camera_topic.clone();
            let mut frames = match gateway.bus.subscribe(&topic).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "camera feed disabled");
                    return;
                }
            };
            info!(topic = %topic, "subscribed to camera topic");
            while let Some(frame) = frames.next().await {
                gateway.ingest_frame(frame);
            }
            info!(topic = %topic, "camera feed ended");
        })
    }

    fn spawn_workflow<S>(&self, prompt: String, sink: S) -> JoinHandle<()>
    where
        S: ProgressSink + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let planner = Arc::clone(&self.planner);
        let step_delay = self.step_delay;
        tokio::spawn(async move {
            run_workflow(bus.as_ref(), planner.as_ref(), step_delay, &prompt, &sink).await;
        })
    }
}

async fn run_workflow(
    bus: &dyn BusClient,
    planner: &dyn Planner,
    step_delay: Duration,
    prompt: &str,
    sink: &dyn ProgressSink,
) {
    info!(goal = prompt, "mission goal received");

    if let Err(e) = bus.publish(topics::GOAL, prompt).await {
        warn!(error = %e, "goal not forwarded to bus, continuing locally");
    }

    let plan = planner.plan(prompt).await;
    let steps_json = match plan.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "plan could not be encoded");
            return;
        }
    };
    sink.plan(&steps_json).await;

    let total = plan.len();
    for (i, step) in plan.steps().iter().enumerate() {
        sink.subtask(step).await;
        info!(step = i + 1, total, subtask = %step, "subtask");
        tokio::time::sleep(step_delay).await;
    }

    sink.subtask(DONE_MARKER).await;
    info!(goal = prompt, "mission complete");
}
