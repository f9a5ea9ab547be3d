//! Runtime settings of the bridge server.

use std::time::Duration;

use rescue_types::topics;

/// Default TCP port, shared by HTTP and the rosbridge WebSocket.
pub const DEFAULT_PORT: u16 = 9090;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// `host:port` to bind, e.g. `"0.0.0.0:9090"`.
    pub bind_addr: String,
    /// Idle time after which an SSE stream gets a keepalive comment.
    pub keepalive: Duration,
    /// Longest an MJPEG client waits for a frame signal before re-checking
    /// the cache.
    pub frame_wait: Duration,
    /// Pause between consecutive subtask broadcasts of a plan.
    pub step_delay: Duration,
    /// Bus topic carrying compressed camera frames.
    pub camera_topic: String,
}

impl BridgeConfig {
    /// Override the bind address (builder-style).
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            keepalive: Duration::from_secs(15),
            frame_wait: Duration::from_secs(1),
            step_delay: Duration::from_secs(1),
            camera_topic: topics::CAMERA.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_contract() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9090");
        assert_eq!(cfg.keepalive, Duration::from_secs(15));
        assert_eq!(cfg.frame_wait, Duration::from_secs(1));
        assert_eq!(cfg.step_delay, Duration::from_secs(1));
        assert_eq!(cfg.camera_topic, "/cam0/compressed");
    }

    #[test]
    fn with_bind_addr_overrides_default() {
        let cfg = BridgeConfig::default().with_bind_addr("127.0.0.1:0");
        assert_eq!(cfg.bind_addr, "127.0.0.1:0");
    }
}
