//! Configuration management for the provisioner.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use snapvol_common::LogFormat;
use snapvol_engine::{HostPathConfig, PluginConfig, ProviderConfig};

use crate::cli::Args;

/// Location tried when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapvol/provisioner.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provisioner instance configuration
    pub provisioner: ProvisionerConfig,
    /// Record store configuration
    pub store: StoreConfig,
    /// Host path plugin configuration
    pub hostpath: HostPathConfig,
    /// Cloud providers to initialize
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref id) = args.id {
            self.provisioner.identity = Some(id.clone());
        }

        if let Some(ref format) = args.log_format {
            self.provisioner.log_format = Some(format.clone());
        }

        if let Some(ref store) = args.store {
            self.store.root = store.clone();
        }

        // A provider named on the command line replaces the configured list.
        if let Some(ref provider) = args.cloud_provider {
            self.providers = vec![ProviderConfig {
                name: provider.clone(),
                config: args.cloud_config.clone(),
            }];
        }

        self
    }

    /// Settings for building the plugin registry.
    pub fn plugin_config(&self) -> PluginConfig {
        PluginConfig {
            hostpath: self.hostpath.clone(),
            providers: self.providers.clone(),
        }
    }
}

/// Provisioner instance configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Identity written into the ownership annotation (auto-generated if not set)
    pub identity: Option<String>,
    /// Log format: pretty or json
    pub log_format: Option<String>,
}

impl ProvisionerConfig {
    /// Get the identity, generating one if not set.
    pub fn get_identity(&self) -> String {
        self.identity
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn get_log_format(&self) -> Result<LogFormat> {
        match &self.log_format {
            Some(format) => format.parse(),
            None => Ok(LogFormat::default()),
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the record files
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/snapvol"),
        }
    }
}
