//! Patchbay Hub Server
//!
//! A standalone patchbay hub that accepts component connections and routes
//! their channels through the configured mappings.

use anyhow::{Context, Result};
use clap::Parser;
use patchbay_bridge::ConnectorConfig;
use patchbay_core::{DEFAULT_TCP_PORT, DEFAULT_WS_PORT};
use patchbay_hub::{HubConfig, HubManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patchbay-hub")]
#[command(about = "Patchbay parameter routing hub")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub name, overrides the config file
    #[arg(short, long)]
    name: Option<String>,

    /// Add a TCP connector on this address
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Add a WebSocket connector on this address
    #[arg(long)]
    websocket: Option<SocketAddr>,

    /// List MIDI ports and exit
    #[cfg(feature = "midi")]
    #[arg(long)]
    list_midi_ports: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<HubConfig> {
    let mut config = match &cli.config {
        Some(path) => HubConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HubConfig::default(),
    };

    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    if let Some(addr) = cli.tcp {
        config
            .connectors
            .push(ConnectorConfig::new("tcp", "tcp").with_bind(addr.to_string()));
    }
    if let Some(addr) = cli.websocket {
        config
            .connectors
            .push(ConnectorConfig::new("websocket", "websocket").with_bind(addr.to_string()));
    }

    // Nothing configured: listen on the default ports
    if config.connectors.is_empty() {
        config.connectors.push(
            ConnectorConfig::new("tcp", "tcp").with_bind(format!("0.0.0.0:{}", DEFAULT_TCP_PORT)),
        );
        config.connectors.push(
            ConnectorConfig::new("websocket", "websocket")
                .with_bind(format!("0.0.0.0:{}", DEFAULT_WS_PORT)),
        );
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    #[cfg(feature = "midi")]
    if cli.list_midi_ports {
        for port in patchbay_bridge::MidiConnector::list_input_ports()? {
            println!("in:  {}", port);
        }
        for port in patchbay_bridge::MidiConnector::list_output_ports()? {
            println!("out: {}", port);
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    tracing::info!("Starting patchbay hub '{}'", config.name);

    let mut hub = HubManager::from_config(config)?;
    hub.start().await?;
    for connector in hub.connectors() {
        match connector.local_addr() {
            Some(addr) => tracing::info!("{} connector '{}' on {}", connector.kind(), connector.name(), addr),
            None => tracing::info!("{} connector '{}' ready", connector.kind(), connector.name()),
        }
    }

    let handle = hub.handle();
    let task = tokio::spawn(hub.run());

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.shutdown().await;
    task.await??;

    Ok(())
}
