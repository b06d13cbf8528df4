//! depot server entry point.
//!
//! # Usage
//!
//! ```text
//! depot-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Config file [default: platform config dir/server.toml]
//!   --port   <PORT>   Overrides [server].port
//!   --bind   <ADDR>   Overrides [server].bind_address
//! ```
//!
//! | Variable       | Overrides  |
//! |----------------|------------|
//! | `DEPOT_CONFIG` | `--config` |
//! | `DEPOT_PORT`   | `--port`   |
//! | `DEPOT_BIND`   | `--bind`   |
//!
//! Log output is controlled by `RUST_LOG`; without it the configured
//! `log_level` applies.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use depot_server::infrastructure::storage::config::{default_config_path, load_config};
use depot_server::runtime::{connection_settings, Assembly, Runtime};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Asset depot server.
#[derive(Debug, Parser)]
#[command(name = "depot-server", about = "Serves assets over the depot protocol", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(long, env = "DEPOT_PORT")]
    port: Option<u16>,

    /// IP address to bind to.  `0.0.0.0` accepts connections on every
    /// interface, `127.0.0.1` only local ones.
    #[arg(long, env = "DEPOT_BIND")]
    bind: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path().context("no --config given and no platform config dir")?,
    };
    let mut config =
        load_config(&config_path).with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();
    info!("depot server starting with {}", config_path.display());

    let addr = config.socket_addr()?;
    let assembly = Assembly::from_config(&config).context("preparing storage")?;
    let runtime = Runtime::launch(addr, connection_settings(&config), assembly)
        .await
        .with_context(|| format!("starting on {addr}"))?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown signal received");

    runtime.shutdown().await?;
    Ok(())
}
