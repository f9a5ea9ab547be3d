//! Best-effort ROS 2 publishing through the `ros2` command-line tool.
//!
//! Used when the bridge runs next to a sourced ROS 2 installation but without
//! a native client binding. Each publish spawns
//! `ros2 topic pub --once <topic> std_msgs/String '{"data": "..."}'` with a
//! timeout. A missing binary, a timeout or a non-zero exit all surface as
//! [`BridgeError::UpstreamUnavailable`]; callers log it and keep going.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use rescue_types::BridgeError;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bus::BusClient;

const DEFAULT_PROGRAM: &str = "ros2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Ros2CliBus {
    program: String,
    timeout: Duration,
}

impl Ros2CliBus {
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the executable (builder-style). Mostly useful in tests.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to the `ros2` binary to publish `message` once.
    pub fn publish_args(topic: &str, message: &str) -> Vec<String> {
        vec![
            "topic".to_string(),
            "pub".to_string(),
            "--once".to_string(),
            topic.to_string(),
            "std_msgs/String".to_string(),
            json!({ "data": message }).to_string(),
        ]
    }
}

impl Default for Ros2CliBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for Ros2CliBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        let args = Self::publish_args(topic, payload);
        info!(program = %self.program, ?args, "ros2 publish");

        let child = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(BridgeError::UpstreamUnavailable(format!(
                    "{} publish timed out after {:?}",
                    self.program, self.timeout
                )));
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(BridgeError::UpstreamUnavailable(format!(
                    "{} CLI not found, running in demo mode",
                    self.program
                )));
            }
            Ok(Err(e)) => {
                return Err(BridgeError::UpstreamUnavailable(format!(
                    "failed to spawn {}: {e}",
                    self.program
                )));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::UpstreamUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!(topic, "ros2 publish complete");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Bytes>, BridgeError> {
        Err(BridgeError::UpstreamUnavailable(format!(
            "cannot subscribe to {topic} through the ros2 CLI; a native ROS 2 binding is required"
        )))
    }
}
