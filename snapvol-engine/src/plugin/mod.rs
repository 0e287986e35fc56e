//! Snapshot plugins and the registry that routes to them.
//!
//! This module provides plugin implementations for different volume types:
//! - **HostPath**: tarballs of local directories (development, single-node)
//! - **RBD**: Ceph RBD snapshots and copy-on-write clones
//! - **LVM**: LVM snapshot logical volumes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     PluginRegistry                              │
//! │  - Built once at startup, read-only afterwards                  │
//! │  - Routes to the plugin matching the populated source variant   │
//! └─────────────────────────┬───────────────────────────────────────┘
//!                           │
//!       ┌───────────────────┼───────────────────┐
//!       ▼                   ▼                   ▼
//! ┌───────────┐      ┌───────────┐       ┌───────────┐
//! │ HostPath  │      │    RBD    │       │    LVM    │
//! │  Plugin   │      │  Plugin   │       │  Plugin   │
//! └───────────┘      └───────────┘       └───────────┘
//! ```

mod command;
mod hostpath;
mod lvm;
mod mock;
mod rbd;
mod traits;

pub use hostpath::*;
pub use lvm::*;
pub use mock::*;
pub use rbd::*;
pub use traits::*;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::cloud::{self, CloudContext, SUPPORTED_PROVIDERS};
use crate::error::{Result, SnapshotError};
use crate::types::VolumeType;

/// An optional provider to initialize at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name ("ceph" or "lvm")
    pub name: String,
    /// Path to the provider's YAML config
    #[serde(default)]
    pub config: Option<PathBuf>,
}

/// Everything needed to build the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub hostpath: HostPathConfig,
    pub providers: Vec<ProviderConfig>,
}

/// Mapping from volume type to the plugin serving it.
///
/// Mutated only while being built; share it behind an `Arc` afterwards so
/// lookups need no locking.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<VolumeType, Arc<dyn SnapshotPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration.
    ///
    /// The host path plugin is always registered. Each configured provider's
    /// plugin is registered only if the provider initializes; a failure is
    /// logged and skipped.
    #[instrument(skip(config), fields(providers = config.providers.len()))]
    pub async fn from_config(config: &PluginConfig) -> Self {
        let mut registry = Self::new();

        for provider in &config.providers {
            let ctx = match cloud::init_provider(&provider.name, provider.config.as_deref()).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(
                        provider = %provider.name,
                        error = %e,
                        supported = ?SUPPORTED_PROVIDERS,
                        "Failed to initialize cloud provider, skipping its plugin"
                    );
                    continue;
                }
            };

            match Self::cloud_plugin(&ctx) {
                Ok(plugin) => {
                    info!(provider = %provider.name, volume_type = %plugin.volume_type(), "Registered cloud plugin");
                    registry.register(plugin.volume_type(), plugin);
                }
                Err(e) => {
                    warn!(provider = %provider.name, error = %e, "Failed to initialize plugin, skipping");
                }
            }
        }

        let hostpath = HostPathPlugin::with_config(config.hostpath.clone());
        registry.register(VolumeType::HostPath, Arc::new(hostpath));

        registry
    }

    /// Create and initialize the plugin backed by a provider.
    fn cloud_plugin(ctx: &CloudContext) -> Result<Arc<dyn SnapshotPlugin>> {
        match ctx {
            CloudContext::Ceph(_) => {
                let mut plugin = RbdPlugin::new();
                plugin.init(ctx)?;
                Ok(Arc::new(plugin))
            }
            CloudContext::Lvm(_) => {
                let mut plugin = LvmPlugin::new();
                plugin.init(ctx)?;
                Ok(Arc::new(plugin))
            }
            CloudContext::None => Err(SnapshotError::Config("no provider context".into())),
        }
    }

    /// Register a plugin, replacing and returning any previous one for the type.
    pub fn register(
        &mut self,
        volume_type: VolumeType,
        plugin: Arc<dyn SnapshotPlugin>,
    ) -> Option<Arc<dyn SnapshotPlugin>> {
        let previous = self.plugins.insert(volume_type, plugin);
        if previous.is_some() {
            warn!(volume_type = %volume_type, "Replaced previously registered plugin");
        }
        previous
    }

    /// Plugin registered for a volume type.
    pub fn lookup(&self, volume_type: VolumeType) -> Option<Arc<dyn SnapshotPlugin>> {
        self.plugins.get(&volume_type).cloned()
    }

    /// Like [`lookup`](Self::lookup) but failing with `UnsupportedVolumeType`.
    pub fn get(&self, volume_type: VolumeType) -> Result<Arc<dyn SnapshotPlugin>> {
        self.lookup(volume_type).ok_or_else(|| {
            SnapshotError::UnsupportedVolumeType(format!(
                "{} is not a supported volume type",
                volume_type
            ))
        })
    }

    /// Registered volume types in a stable order.
    pub fn volume_types(&self) -> Vec<VolumeType> {
        VolumeType::ALL
            .into_iter()
            .filter(|t| self.plugins.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_unregistered() {
        let registry = PluginRegistry::new();
        assert!(registry.lookup(VolumeType::Rbd).is_none());
        assert!(matches!(
            registry.get(VolumeType::Rbd),
            Err(SnapshotError::UnsupportedVolumeType(_))
        ));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = PluginRegistry::new();
        let first = Arc::new(MockPlugin::new(VolumeType::HostPath));
        let second = Arc::new(MockPlugin::new(VolumeType::HostPath));

        assert!(registry.register(VolumeType::HostPath, first.clone()).is_none());
        assert!(registry.register(VolumeType::HostPath, second.clone()).is_some());

        let found = registry.lookup(VolumeType::HostPath).unwrap();
        let second_dyn: Arc<dyn SnapshotPlugin> = second;
        assert!(Arc::ptr_eq(&found, &second_dyn));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_always_has_hostpath() {
        let registry = PluginRegistry::from_config(&PluginConfig::default()).await;
        assert_eq!(registry.volume_types(), vec![VolumeType::HostPath]);
    }

    #[tokio::test]
    async fn test_from_config_skips_failed_providers() {
        let config = PluginConfig {
            providers: vec![
                ProviderConfig {
                    name: "ceph".into(),
                    config: Some(PathBuf::from("/nonexistent/ceph.yaml")),
                },
                ProviderConfig {
                    name: "aws".into(),
                    config: None,
                },
            ],
            ..Default::default()
        };
        let registry = PluginRegistry::from_config(&config).await;
        assert_eq!(registry.volume_types(), vec![VolumeType::HostPath]);
    }

    #[test]
    fn test_cloud_plugin_matches_context() {
        let ctx = CloudContext::Lvm(crate::cloud::LvmContext {
            volume_group: "vg0".into(),
            lvm_path: "lvm".into(),
        });
        let plugin = PluginRegistry::cloud_plugin(&ctx).unwrap();
        assert_eq!(plugin.volume_type(), VolumeType::Lvm);
        assert!(PluginRegistry::cloud_plugin(&CloudContext::None).is_err());
    }
}
