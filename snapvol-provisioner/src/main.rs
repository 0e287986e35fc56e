//! # snapvol Provisioner
//!
//! Restores volume snapshots into new volumes. Each invocation runs one
//! operation against the file-backed record store and exits.
//!
//! ## Features
//! - Provision a volume from the snapshot named by a claim
//! - Delete volumes this provisioner instance created
//! - Take and delete snapshots
//!
//! ## Usage
//! ```bash
//! snapvol-provisioner --id prov-A provision --claim claim.yaml --volume-name pv-1
//! snapvol-provisioner --cloudprovider ceph --cloudconfig /etc/snapvol/ceph.yaml plugins
//! ```

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod commands;
mod config;
mod store;

use cli::Args;
use commands::App;
use config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    let config = load_config(&args)?;

    // Initialize logging
    config.provisioner.get_log_format()?.init(&args.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        "Starting snapvol provisioner"
    );

    let app = App::new(&config, args.output).await;
    info!(
        identity = %app.identity(),
        store = %config.store.root.display(),
        "Provisioner configured"
    );

    if let Err(e) = app.run(args.command).await {
        error!(error = %format!("{:#}", e), "Command failed");
        return Err(e);
    }

    Ok(())
}

/// Load the explicit config file, else the default one if present, else defaults.
fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)?,
        None => Config::default(),
    };
    Ok(config.with_cli_overrides(args))
}
