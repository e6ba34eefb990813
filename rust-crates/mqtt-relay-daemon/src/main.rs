//! MQTT relay daemon
//!
//! Subscribes to the configured MQTT topics, parses line protocol payloads
//! and streams the matching points to WebSocket clients.
//! Clients send `subscribe:[{"measurement":"...","tags":["k=v"]}]` to choose
//! what they receive and `subscribe:false` to stop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mqtt_relay_broker::{DispatchTable, FanoutDispatcher, RelayServer};
use mqtt_relay_daemon::config::RelayConfig;
use mqtt_relay_daemon::producer::SampleProducer;
use mqtt_relay_daemon::shutdown::{Shutdown, ShutdownSignals};
use mqtt_relay_daemon::upstream::MqttUpstream;

#[derive(Parser, Debug)]
#[command(name = "mqtt-relay", version, about = "Relay MQTT measurements to filtered WebSocket subscribers")]
struct Args {
    /// Configuration file (default: <config dir>/mqtt-relay/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Publish sample points to the main topic
    #[arg(long)]
    produce: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("Starting MQTT relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = RelayConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.apply_env_overrides();

    info!("Configuration loaded from {}", config.config_path.display());

    let table = DispatchTable::with_line_protocol(config.topics());
    let dispatcher = FanoutDispatcher::new(table);

    info!("Connecting to MQTT broker at {}", config.mqtt.url);
    let upstream = MqttUpstream::connect(&config.mqtt, &dispatcher.table().topics())
        .await
        .context("Failed to subscribe to upstream MQTT topics")?;
    let mqtt_client = upstream.client();

    let server = RelayServer::new(config.websocket.bind_addr.clone(), dispatcher.clone());
    server.start().await
        .context("Failed to start WebSocket server")?;

    if args.produce || config.producer.enabled {
        let producer = SampleProducer::new(upstream.client(), &config);
        tokio::spawn(producer.run());
    }

    let mut signals = ShutdownSignals::install()
        .context("Failed to install signal handlers")?;

    info!("MQTT relay ready");

    tokio::select! {
        _ = upstream.run(dispatcher) => {}
        signal = signals.recv() => match signal {
            Shutdown::Interrupt => info!("Received Ctrl-C"),
            Shutdown::Terminate => info!("Received SIGTERM"),
        },
    }

    info!("Shutting down...");
    server.stop().await?;
    if let Err(e) = mqtt_client.try_disconnect() {
        warn!("MQTT disconnect failed: {}", e);
    }
    info!("MQTT relay stopped");

    Ok(())
}
