//! Altherma Daemon - Main entry point
//!
//! Discovers the channels of one heat-pump adapter and keeps their values
//! fresh until interrupted.

use altherma_daemon::{config, DeviceHandler, HandlerConfig, LogHost};
use altherma_discovery::{discover, fetch_descriptor, DiscoveryResult};
use altherma_m2m::WsTransport;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "altherma")]
#[command(about = "Daikin Altherma adapter discovery and polling daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "altherma.toml")]
    config: PathBuf,

    /// Adapter host name or address
    #[arg(long)]
    host: Option<String>,

    /// Adapter port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Discover the resource tree once, print it, and exit
    #[arg(long)]
    discover_once: bool,

    /// Read the adapter's identity, print it, and exit
    #[arg(long, conflicts_with = "discover_once")]
    identify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Altherma v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(host) = args.host {
        config.device.host = host;
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }

    let endpoint = config.endpoint();
    info!(
        endpoint = %endpoint,
        poll_interval_secs = config.device.poll_interval_secs,
        "Configuration loaded"
    );

    let mut transport = WsTransport::new(config.transport_config());

    if args.identify {
        let descriptor = fetch_descriptor(&mut transport, &endpoint).await?;
        let result = DiscoveryResult::new(&endpoint, descriptor);
        println!("{} ({})", result.label, result.thing_id);
        for (key, value) in &result.properties {
            println!("  {}: {}", key, value);
        }
        return Ok(());
    }

    if args.discover_once {
        info!("Running single discovery");
        let model = discover(&mut transport, &endpoint, &config.discovery_config()).await?;
        println!("Discovered {} channels in {} groups:", model.len(), model.groups().len());
        for group in model.groups() {
            println!("  {} (index {})", group.label, group.index);
            for channel in &group.channels {
                println!("    - {} [{}]", channel.label, channel.id);
            }
        }
        return Ok(());
    }

    let host = Arc::new(LogHost::new(config.linked_channels()));
    let mut handler = DeviceHandler::new(
        HandlerConfig {
            endpoint,
            schedule: config.schedule(),
            discovery: config.discovery_config(),
        },
        transport,
        host.clone(),
    );

    handler.initialize();
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handler.dispose().await;

    info!(
        status = %host.status(),
        channels = handler.model().len(),
        values = host.readings().len(),
        "Final state"
    );

    Ok(())
}
