//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// snapvol Provisioner - restores volume snapshots into new volumes
#[derive(Parser, Debug)]
#[command(name = "snapvol-provisioner")]
#[command(about = "snapvol Provisioner - restores volume snapshots into new volumes")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Unique provisioner identity (UUID generated if not provided)
    #[arg(long = "id", global = true, env = "SNAPVOL_PROVISIONER_ID")]
    pub id: Option<String>,

    /// Cloud provider whose plugin should be registered (ceph, lvm)
    #[arg(long = "cloudprovider", global = true)]
    pub cloud_provider: Option<String>,

    /// Path to the cloud provider configuration file
    #[arg(long = "cloudconfig", global = true, requires = "cloud_provider")]
    pub cloud_config: Option<PathBuf>,

    /// Root directory of the record store
    #[arg(long, global = true, env = "SNAPVOL_STORE")]
    pub store: Option<PathBuf>,

    /// Format of printed records
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Format of records printed to stdout.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision a volume from the snapshot named by a claim
    Provision {
        /// Path to the VolumeClaim YAML
        #[arg(long)]
        claim: PathBuf,

        /// Name of the volume to create
        #[arg(long)]
        volume_name: String,

        /// Reclaim policy of the new volume (Retain, Delete)
        #[arg(long, default_value = "Delete")]
        reclaim_policy: String,

        /// Storage class parameter passed to the plugin (key=value)
        #[arg(long = "param", value_parser = parse_key_val)]
        parameters: Vec<(String, String)>,
    },

    /// Delete a volume created by this provisioner
    Delete {
        /// Volume name
        volume: String,
    },

    /// Take or delete snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// List registered volume types
    Plugins,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Take the snapshot and bind it to new SnapshotData
    Create { namespace: String, name: String },

    /// Delete the snapshot's artifact and unbind it
    Delete { namespace: String, name: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}
