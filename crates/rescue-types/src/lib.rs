use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Well-known topic names shared by the bus, the SSE stream and the
/// rosbridge WebSocket clients.
pub mod topics {
    /// Inbound mission goal (`std_msgs/String`, `{"data": prompt}`).
    pub const GOAL: &str = "/mission/goal";
    /// Outbound full plan; `data` is a JSON-encoded array of step strings.
    pub const PLAN: &str = "/plan/full";
    /// Outbound current subtask; `data` is the step text.
    pub const SUBTASK: &str = "/subtask/current";
    /// Compressed camera frames (`sensor_msgs/CompressedImage`).
    pub const CAMERA: &str = "/cam0/compressed";
}

/// Terminal subtask broadcast once every step of a plan has been emitted.
pub const DONE_MARKER: &str = "Done.";

/// Opaque identity of one live connection registered with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `(event_type, payload)` pair queued for a streaming subscriber.
///
/// The payload is already serialised (e.g. a JSON-encoded plan array or a
/// raw subtask string); adapters only frame it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: String,
    pub payload: String,
}

impl StreamEvent {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }
}

/// Ordered, immutable list of subtasks produced for a single goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<String>,
}

impl Plan {
    pub fn new(steps: Vec<String>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Encode the steps as a JSON array string, the wire form used by both the
    /// `plan` SSE event and the `/plan/full` topic.
    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(&self.steps).map_err(BridgeError::from)
    }
}

/// Error taxonomy for the bridge.
///
/// None of these are process-fatal except [`BridgeError::Bind`], which can
/// only occur while the listener is being set up.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed or empty client input. Surfaced as a 4xx response or a
    /// dropped frame; the connection stays open.
    #[error("Client Request Error: {0}")]
    ClientRequest(String),

    /// Peer reset, broken pipe or handshake failure. Terminates only the
    /// affected connection.
    #[error("Transport Error: {0}")]
    Transport(String),

    /// The external bus (or its tooling) is unreachable. The caller logs it
    /// and carries on in local-only mode.
    #[error("Upstream Unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A subscriber's bounded queue filled up and it was dropped.
    #[error("Backpressure Eviction: subscriber {0} fell behind")]
    BackpressureEviction(SubscriberId),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Bind Error on {addr}: {details}")]
    Bind { addr: String, details: String },
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}
