//! Configuration Vault – reads/writes `~/.edge-rescue/config.toml`.

use rescue_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which bus adapter the bridge talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    /// In-process bus; no robot attached.
    #[default]
    Local,
    /// Publish through the `ros2` command-line tool.
    Ros2Cli,
}

impl std::fmt::Display for BusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusKind::Local => write!(f, "local"),
            BusKind::Ros2Cli => write!(f, "ros2-cli"),
        }
    }
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(BusKind::Local),
            "ros2-cli" => Ok(BusKind::Ros2Cli),
            other => Err(format!("unknown bus kind {other:?}")),
        }
    }
}

/// Persisted bridge configuration stored in `~/.edge-rescue/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port shared by HTTP and the rosbridge WebSocket.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Events buffered per SSE client before it is evicted.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Longest an MJPEG client sleeps before re-checking the frame cache.
    #[serde(default = "default_frame_wait_ms")]
    pub frame_wait_ms: u64,

    /// Pause between subtask broadcasts.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    #[serde(default)]
    pub bus: BusKind,

    #[serde(default = "default_camera_topic")]
    pub camera_topic: String,

    /// Timeout for one `ros2 topic pub` invocation.
    #[serde(default = "default_ros2_timeout_secs")]
    pub ros2_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    rescue_bridge::DEFAULT_PORT
}
fn default_queue_capacity() -> usize {
    rescue_middleware::DEFAULT_QUEUE_CAPACITY
}
fn default_keepalive_secs() -> u64 {
    15
}
fn default_frame_wait_ms() -> u64 {
    1000
}
fn default_step_delay_ms() -> u64 {
    1000
}
fn default_camera_topic() -> String {
    rescue_types::topics::CAMERA.to_string()
}
fn default_ros2_timeout_secs() -> u64 {
    10
}

/// Shortest SSE keepalive interval handed to the bridge.
const MIN_KEEPALIVE_SECS: u64 = 1;
/// Shortest MJPEG re-check interval handed to the bridge.
const MIN_FRAME_WAIT_MS: u64 = 10;

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            queue_capacity: default_queue_capacity(),
            keepalive_secs: default_keepalive_secs(),
            frame_wait_ms: default_frame_wait_ms(),
            step_delay_ms: default_step_delay_ms(),
            bus: BusKind::default(),
            camera_topic: default_camera_topic(),
            ros2_timeout_secs: default_ros2_timeout_secs(),
        }
    }
}

impl Config {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Runtime settings handed to the bridge server.
    ///
    /// Zero keepalive or frame-wait intervals would make idle streams spin,
    /// so both are raised to a small minimum.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bind_addr: self.bind_addr(),
            keepalive: Duration::from_secs(self.keepalive_secs.max(MIN_KEEPALIVE_SECS)),
            frame_wait: Duration::from_millis(self.frame_wait_ms.max(MIN_FRAME_WAIT_MS)),
            step_delay: Duration::from_millis(self.step_delay_ms),
            camera_topic: self.camera_topic.clone(),
        }
    }
}

/// Return the path to `~/.edge-rescue/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".edge-rescue").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// Load the config from a specific path, without environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `RESCUE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RESCUE_HOST` | `host` |
/// | `RESCUE_PORT` | `port` |
/// | `RESCUE_QUEUE_CAPACITY` | `queue_capacity` |
/// | `RESCUE_KEEPALIVE_SECS` | `keepalive_secs` |
/// | `RESCUE_STEP_DELAY_MS` | `step_delay_ms` |
/// | `RESCUE_BUS` | `bus` (`local` or `ros2-cli`) |
/// | `RESCUE_CAMERA_TOPIC` | `camera_topic` |
///
/// Values that do not parse are ignored, as is a zero keepalive.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RESCUE_HOST") {
        cfg.host = v;
    }
    if let Ok(v) = std::env::var("RESCUE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("RESCUE_QUEUE_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.queue_capacity = n;
    }
    if let Ok(v) = std::env::var("RESCUE_KEEPALIVE_SECS")
        && let Ok(n) = v.parse::<u64>()
        && n > 0
    {
        cfg.keepalive_secs = n;
    }
    if let Ok(v) = std::env::var("RESCUE_STEP_DELAY_MS")
        && let Ok(n) = v.parse::<u64>()
    {
        cfg.step_delay_ms = n;
    }
    if let Ok(v) = std::env::var("RESCUE_BUS")
        && let Ok(bus) = v.parse::<BusKind>()
    {
        cfg.bus = bus;
    }
    if let Ok(v) = std::env::var("RESCUE_CAMERA_TOPIC") {
        cfg.camera_topic = v;
    }
}

/// Save the config to disk, creating `~/.edge-rescue/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.port, 9090);
        assert_eq!(loaded.queue_capacity, 256);
        assert_eq!(loaded.bus, BusKind::Local);
        assert_eq!(loaded.camera_topic, "/cam0/compressed");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 9191\nbus = \"ros2-cli\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.port, 9191);
        assert_eq!(loaded.bus, BusKind::Ros2Cli);
        assert_eq!(loaded.host, "0.0.0.0");
        assert_eq!(loaded.keepalive_secs, 15);
        assert_eq!(loaded.ros2_timeout_secs, 10);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_edge_rescue_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.edge-rescue/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn bridge_config_conversion() {
        let cfg = Config {
            host: "127.0.0.1".to_string(),
            step_delay_ms: 250,
            ..Config::default()
        };
        let bridge = cfg.bridge_config();
        assert_eq!(bridge.bind_addr, "127.0.0.1:9090");
        assert_eq!(bridge.step_delay, Duration::from_millis(250));
        assert_eq!(bridge.keepalive, Duration::from_secs(15));
        assert_eq!(bridge.frame_wait, Duration::from_secs(1));
    }

    #[test]
    fn zero_intervals_are_raised_to_a_minimum() {
        let cfg = Config {
            keepalive_secs: 0,
            frame_wait_ms: 0,
            ..Config::default()
        };
        let bridge = cfg.bridge_config();
        assert_eq!(bridge.keepalive, Duration::from_secs(1));
        assert_eq!(bridge.frame_wait, Duration::from_millis(10));
    }

    #[test]
    fn apply_env_overrides_ignores_zero_keepalive() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RESCUE_KEEPALIVE_SECS", "0") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.keepalive_secs, 15);
        unsafe { std::env::remove_var("RESCUE_KEEPALIVE_SECS") };
    }

    #[test]
    fn bus_kind_parses_kebab_case() {
        assert_eq!("ros2-cli".parse::<BusKind>(), Ok(BusKind::Ros2Cli));
        assert_eq!("local".parse::<BusKind>(), Ok(BusKind::Local));
        assert!("ros2".parse::<BusKind>().is_err());
        assert_eq!(BusKind::Ros2Cli.to_string(), "ros2-cli");
    }

    #[test]
    fn apply_env_overrides_changes_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RESCUE_PORT", "9999") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, 9999);
        unsafe { std::env::remove_var("RESCUE_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_queue_capacity() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RESCUE_QUEUE_CAPACITY", "lots") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.queue_capacity, 256);
        unsafe { std::env::remove_var("RESCUE_QUEUE_CAPACITY") };
    }

    #[test]
    fn apply_env_overrides_changes_bus() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RESCUE_BUS", "ros2-cli") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bus, BusKind::Ros2Cli);
        unsafe { std::env::remove_var("RESCUE_BUS") };
    }

    #[test]
    fn apply_env_overrides_changes_camera_topic() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RESCUE_CAMERA_TOPIC", "/front/compressed") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.camera_topic, "/front/compressed");
        unsafe { std::env::remove_var("RESCUE_CAMERA_TOPIC") };
    }
}
