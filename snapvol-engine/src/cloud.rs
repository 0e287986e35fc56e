//! Cloud provider initialization.
//!
//! A provider is an optional storage integration whose plugin is only
//! registered when its client can be initialized. Initialization reads a
//! YAML config file and checks that the backend CLI answers.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::{Result, SnapshotError};

/// Providers this build knows how to initialize.
pub const SUPPORTED_PROVIDERS: [&str; 2] = ["ceph", "lvm"];

/// Known provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ceph,
    Lvm,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ceph => "ceph",
            ProviderKind::Lvm => "lvm",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ceph" => Ok(ProviderKind::Ceph),
            "lvm" => Ok(ProviderKind::Lvm),
            other => Err(SnapshotError::Config(format!(
                "unknown cloud provider {}, supported providers are {:?}",
                other, SUPPORTED_PROVIDERS
            ))),
        }
    }
}

fn default_ceph_user() -> String {
    "admin".to_string()
}

fn default_rbd_path() -> String {
    "rbd".to_string()
}

fn default_lvm_path() -> String {
    "lvm".to_string()
}

/// Ceph cluster access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephContext {
    /// Default RBD pool
    pub pool: String,
    /// Monitor addresses (e.g., ["10.0.0.1:6789"])
    #[serde(default)]
    pub monitors: Vec<String>,
    #[serde(default = "default_ceph_user")]
    pub user: String,
    #[serde(default)]
    pub keyring_path: String,
    /// Namespace within the pool
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_rbd_path")]
    pub rbd_path: String,
}

/// Local LVM volume group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmContext {
    /// The only volume group the plugin touches; it must hold a thin pool
    pub volume_group: String,
    #[serde(default = "default_lvm_path")]
    pub lvm_path: String,
}

/// Handle returned by provider initialization and handed to plugin `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudContext {
    /// No provider; used for plugins that need none
    None,
    Ceph(CephContext),
    Lvm(LvmContext),
}

impl CloudContext {
    pub fn kind(&self) -> Option<ProviderKind> {
        match self {
            CloudContext::None => None,
            CloudContext::Ceph(_) => Some(ProviderKind::Ceph),
            CloudContext::Lvm(_) => Some(ProviderKind::Lvm),
        }
    }
}

/// Parse and validate a provider's config file without touching the backend.
pub async fn load_provider_config(kind: ProviderKind, config_path: Option<&Path>) -> Result<CloudContext> {
    let path = config_path.ok_or_else(|| {
        SnapshotError::Config(format!("provider {} requires a config file", kind))
    })?;

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SnapshotError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;

    let parse_err = |e: serde_yaml::Error| {
        SnapshotError::Config(format!("failed to parse {}: {}", path.display(), e))
    };

    match kind {
        ProviderKind::Ceph => {
            let ctx: CephContext = serde_yaml::from_str(&content).map_err(parse_err)?;
            if ctx.pool.is_empty() {
                return Err(SnapshotError::Config("Ceph pool name is required".into()));
            }
            Ok(CloudContext::Ceph(ctx))
        }
        ProviderKind::Lvm => {
            let ctx: LvmContext = serde_yaml::from_str(&content).map_err(parse_err)?;
            if ctx.volume_group.is_empty() {
                return Err(SnapshotError::Config("LVM volume group is required".into()));
            }
            Ok(CloudContext::Lvm(ctx))
        }
    }
}

/// Initialize a provider by name: load its config and check the backend CLI answers.
#[instrument(fields(config = ?config_path))]
pub async fn init_provider(name: &str, config_path: Option<&Path>) -> Result<CloudContext> {
    let kind: ProviderKind = name.parse()?;
    let ctx = load_provider_config(kind, config_path).await?;

    let (program, arg) = match &ctx {
        CloudContext::Ceph(c) => (c.rbd_path.as_str(), "--version"),
        CloudContext::Lvm(c) => (c.lvm_path.as_str(), "version"),
        CloudContext::None => return Ok(CloudContext::None),
    };

    let output = Command::new(program)
        .arg(arg)
        .output()
        .await
        .map_err(|e| SnapshotError::Config(format!("{} not found or not executable: {}", program, e)))?;

    if !output.status.success() {
        return Err(SnapshotError::Config(format!("{} version check failed", program)));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    debug!(version = %version.lines().next().unwrap_or("unknown"), "Backend CLI available");
    info!(provider = %kind, "Cloud provider initialized");

    Ok(ctx)
}
