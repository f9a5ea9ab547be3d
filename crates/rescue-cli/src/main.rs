//! `edge-rescue` – Edge Rescue bridge server.
//!
//! 1. Initialises tracing (optionally exporting spans over OTLP).
//! 2. Loads `~/.edge-rescue/config.toml`, writing the defaults on first run.
//! 3. Connects the chosen bus adapter, starts camera ingest and serves HTTP,
//!    SSE, MJPEG and the rosbridge WebSocket on one port.
//! 4. Stops accepting connections on Ctrl-C.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rescue_bridge::{BridgeServer, Gateway};
use rescue_middleware::{Broker, BusClient, LocalBus, Ros2CliBus};
use rescue_types::BridgeError;
use tracing::{error, info, warn};

use crate::config::{BusKind, Config};

fn main() -> ExitCode {
    // Tracing first: the OTLP exporter is built outside the Tokio runtime.
    let _guard = telemetry::init_tracing("edge-rescue");

    print_banner();
    let cfg = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ Edge Rescue bridge stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), BridgeError> {
    let bus: Arc<dyn BusClient> = match cfg.bus {
        BusKind::Local => Arc::new(LocalBus::default()),
        BusKind::Ros2Cli => Arc::new(
            Ros2CliBus::new().with_timeout(Duration::from_secs(cfg.ros2_timeout_secs)),
        ),
    };
    let bridge_cfg = cfg.bridge_config();

    let broker = Arc::new(Broker::new(cfg.queue_capacity));
    let gateway = Gateway::new(broker, bus)
        .with_step_delay(bridge_cfg.step_delay)
        .with_camera_topic(bridge_cfg.camera_topic.clone());
    let camera = gateway.spawn_camera_ingest();

    let server = BridgeServer::new(gateway, bridge_cfg);
    let listener = server.bind().await?;
    let local = listener.local_addr()?;

    println!();
    println!("  {} http://{}", "Listening on".bold(), local);
    println!("  {} {}", "Bus adapter:".bold(), cfg.bus.to_string().cyan());
    println!("  Routes: POST /goal · GET /events · GET /cam0/stream · GET /cam0/snap · ws://{local}/");
    println!("  Press {} to stop.\n", "Ctrl-C".bold());
    info!(addr = %local, bus = %cfg.bus, queue_capacity = cfg.queue_capacity, "bridge started");

    let result = server.serve(listener, shutdown_signal()).await;
    camera.abort();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process another way");
        std::future::pending::<()>().await;
    }
    println!();
    println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
}

/// Load the config vault, creating it with defaults on first run.
fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____   __              ___                       "#.bold().red());
    println!("{}", r#"  / __/__/ /__ ____ ___  / _ \___ ___ ______ _____ "#.bold().red());
    println!("{}", r#" / _// _  / _ `/ -_) _ \/ , _/ -_|_-</ __/ // / -_)"#.bold().red());
    println!("{}", r#"/___/\_,_/\_, /\__/\___/_/|_|\__/___/\__/\_,_/\__/ "#.bold().red());
    println!("{}", r#"          /___/                                     "#.bold().red());
    println!();
    println!(
        "  {} {}",
        "Edge Rescue bridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Goal ingress, plan streaming and camera relay for the rescue robot");
    println!();
}
