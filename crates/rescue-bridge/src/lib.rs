//! `rescue-bridge` – client-facing surface of the Edge Rescue bridge.
//!
//! One axum router serves plain HTTP and the rosbridge WebSocket protocol. The
//! protocol adapters are thin encoders over the shared state in
//! `rescue-middleware`; the [`Gateway`] is where goals, client publishes and
//! camera frames enter the system.
//!
//! # Modules
//!
//! - [`server`] – [`BridgeServer`]: routes, CORS and the body limit.
//! - [`sse`] – Server-Sent Events encoding and the per-client event stream.
//! - [`mjpeg`] – multipart JPEG stream and single-frame snapshot.
//! - [`rosbridge`] – rosbridge v2 subset over WebSocket.
//! - [`gateway`] – [`Gateway`]: goal workflow, publish relay, camera ingest.
//! - [`planner`] – [`Planner`] seam and the [`PlaceholderPlanner`].
//! - [`config`] – [`BridgeConfig`] runtime settings.

pub mod config;
pub mod gateway;
pub mod mjpeg;
pub mod planner;
pub mod rosbridge;
pub mod server;
pub mod sse;

pub use config::{BridgeConfig, DEFAULT_PORT};
pub use gateway::{Gateway, ProgressSink};
pub use planner::{PlaceholderPlanner, Planner};
pub use rosbridge::{ClientOp, RosbridgeSession, WsPeer};
pub use server::{BANNER, BridgeServer, MAX_BODY_BYTES};
