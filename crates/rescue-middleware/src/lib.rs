//! `rescue-middleware` – shared broker state for the Edge Rescue bridge.
//!
//! Everything here is transport-agnostic: no sockets, no HTTP. Protocol
//! adapters in `rescue-bridge` are thin encoders on top of these primitives.
//!
//! # Modules
//!
//! - [`registry`] – [`TopicRegistry`]: topic → set of subscriber handles,
//!   guarded by one short-held lock.
//! - [`fanout`] – [`EventHub`]: bounded per-subscriber queues with
//!   drop-on-full eviction, and the [`Subscription`] guard that deregisters on
//!   drop.
//! - [`frame_cache`] – [`FrameCache`]: single-slot latest camera frame with
//!   per-watcher wake-ups.
//! - [`peer`] – [`PeerHub`]: direct-send subscribers used by the rosbridge
//!   WebSocket protocol.
//! - [`bus`] – the [`BusClient`] seam to the external robotics bus and the
//!   in-process [`LocalBus`] implementation.
//! - [`ros2_cli`] – [`Ros2CliBus`]: best-effort publishing through the
//!   `ros2` command-line tool.
//! - [`broker`] – [`Broker`]: owns all of the above for the process lifetime.

pub mod broker;
pub mod bus;
pub mod fanout;
pub mod frame_cache;
pub mod peer;
pub mod registry;
pub mod ros2_cli;

pub use broker::Broker;
pub use bus::{BusClient, LocalBus};
pub use fanout::{EventHub, Subscription, Wake, DEFAULT_QUEUE_CAPACITY};
pub use frame_cache::{Frame, FrameCache, FrameWatcher};
pub use peer::{DEFAULT_SEND_TIMEOUT, PeerHandle, PeerHub, PeerSink};
pub use registry::{Delivery, DeliveryReport, TopicRegistry};
pub use ros2_cli::Ros2CliBus;
