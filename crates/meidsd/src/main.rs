//! Board server daemon
//!
//! Opens the boards named in the configuration and exports them to remote
//! clients over the remote-procedure protocol.
//!
//! # Usage
//!
//! Serve the configured boards:
//! ```bash
//! meidsd --config config/meids.toml serve --port 10001
//! ```
//!
//! Print the catalog:
//! ```bash
//! meidsd --config config/meids.toml list
//! ```
//!
//! Print the effective configuration after environment overrides:
//! ```bash
//! MEIDS_REMOTE__TIMEOUT_MS=500 meidsd config
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meids::config::MeidsConfig;
use meids::logging::{self, LogConfig};
use meids::rpc::server::serve;
use meids::Driver;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "meidsd")]
#[command(about = "Board server for ME data-acquisition boards", long_about = None)]
struct Cli {
    /// Configuration file (TOML); MEIDS_* environment variables override it
    #[arg(long, global = true, default_value = "config/meids.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the configured boards to remote clients
    Serve {
        /// Address to bind (overrides rpc_server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides rpc_server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the device catalog and exit
    List,

    /// Print the effective configuration as TOML and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MeidsConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;

    logging::init(LogConfig::from_config(&config).map_err(anyhow::Error::msg)?).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.rpc_server.bind = bind;
            }
            if let Some(port) = port {
                config.rpc_server.port = port;
            }
            start_server(config).await
        }
        Commands::List => list_devices(config).await,
        Commands::Config => {
            print!("{}", config.to_toml().context("rendering configuration")?);
            Ok(())
        }
    }
}

async fn open_driver(config: MeidsConfig) -> Result<Driver> {
    tokio::task::spawn_blocking(move || Driver::open(&config))
        .await
        .context("driver open task failed")?
        .context("opening driver")
}

async fn start_server(config: MeidsConfig) -> Result<()> {
    let addr = config.rpc_server.listen_address();
    let driver = Arc::new(open_driver(config).await?);
    info!(devices = driver.query_number_devices(), "boards ready");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tokio::select! {
        result = serve(listener, driver) => result.context("board server failed")?,
        _ = signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}

async fn list_devices(config: MeidsConfig) -> Result<()> {
    let driver = open_driver(config).await?;
    for entry in driver.catalog().devices() {
        println!(
            "{:>3}  {:<10} serial {:<8} {:?} {:?} ({} subdevices)",
            entry.logical_no,
            entry.name,
            entry.serial_no,
            entry.plug,
            entry.access,
            entry.subdevices.len()
        );
    }
    Ok(())
}
