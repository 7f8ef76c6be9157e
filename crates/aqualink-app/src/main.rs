//! aqualinkd
//!
//! Emulates the configured panels on the controller's RS-485 bus.

use std::path::PathBuf;

use anyhow::{Context, Result};
use aqualink_core::config::EngineConfig;
use aqualink_core::engine::Engine;
use aqualink_core::protocol::{list_ports, open_port, ProtocolError};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BUILD_ID: &str = match option_env!("AQUALINK_BUILD_ID") {
    Some(id) => id,
    None => "unknown",
};

#[derive(Parser, Debug)]
#[command(name = "aqualinkd", version)]
#[command(about = "Panel emulator for Aqualink pool controllers")]
struct Cli {
    /// JSON configuration file; defaults are used when omitted
    config: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(short, long, conflicts_with_all = ["config", "defaults"])]
    list: bool,

    /// Print the default configuration and exit
    #[arg(long, conflicts_with = "config")]
    defaults: bool,

    /// Serial device, overriding the configuration
    #[arg(short, long)]
    device: Option<String>,

    /// Decode the bus without transmitting
    #[arg(short, long)]
    monitor: bool,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if config.state_file.is_none() {
        config.state_file = dirs::data_local_dir().map(|dir| dir.join("aqualink").join("pool.dat"));
    }
    if let Some(device) = &cli.device {
        config.serial_device = device.clone();
    }
    config.monitor_mode |= cli.monitor;
    Ok(config)
}

async fn run(config: EngineConfig) -> Result<()> {
    // without a port the engine still runs, with a stale pool
    let port = match open_port(&config.serial_device, Some(config.baud_rate)) {
        Ok(port) => {
            info!(device = %config.serial_device, baud = config.baud_rate, "Serial port open");
            Some(port)
        }
        Err(e) => {
            error!(device = %config.serial_device, error = %e, "Serial port unavailable, running without a link");
            None
        }
    };

    let mut engine = Engine::start(config).context("starting engine")?;
    let link = port.map(|port| engine.spawn_link(port));
    engine.spawn_clock_job();

    tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
    info!("Interrupted");

    info!("Final state\n{}", engine.pool().snapshot());
    engine.shutdown().await;
    if let Some(link) = link {
        match link.await {
            Ok(Ok(())) | Ok(Err(ProtocolError::LinkClosed)) => {}
            Ok(Err(e)) => warn!(error = %e, "Link ended with an error"),
            Err(e) => warn!(error = %e, "Link task did not stop cleanly"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aqualink_core=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.list {
        for port in list_ports() {
            match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => println!(
                    "{}\t{:04x}:{:04x}\t{}",
                    port.name,
                    vid,
                    pid,
                    port.product.unwrap_or_default()
                ),
                _ => println!("{}", port.name),
            }
        }
        return Ok(());
    }
    if cli.defaults {
        println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
        return Ok(());
    }

    info!(build = BUILD_ID, version = aqualink_core::VERSION, "aqualinkd starting");
    let config = load_config(&cli)?;
    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = %e, "aqualinkd stopped");
    }
    result
}
