//! Subcommand handlers.
//!
//! Each handler builds what it needs from the loaded [`Config`], runs one
//! engine operation and prints the resulting record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use snapvol_engine::{
    DeleteOutcome, PluginRegistry, ProvisionRequest, Provisioner, ReclaimPolicy, RecordStore,
    RecordWriter, SnapshotTaker, VolumeClaim,
};
use tracing::{info, warn};

use crate::cli::{Command, OutputFormat, SnapshotCommand};
use crate::config::Config;
use crate::store::FileRecordStore;

/// Shared state of one invocation.
pub struct App {
    identity: String,
    registry: Arc<PluginRegistry>,
    store: Arc<FileRecordStore>,
    output: OutputFormat,
}

impl App {
    /// Build the plugin registry and open the record store.
    pub async fn new(config: &Config, output: OutputFormat) -> Self {
        let registry = PluginRegistry::from_config(&config.plugin_config()).await;
        info!(
            volume_types = ?registry.volume_types(),
            "Plugin registry built"
        );

        Self {
            identity: config.provisioner.get_identity(),
            registry: Arc::new(registry),
            store: Arc::new(FileRecordStore::new(&config.store.root)),
            output,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.identity.clone(), self.registry.clone(), self.store.clone())
    }

    fn taker(&self) -> SnapshotTaker {
        SnapshotTaker::new(self.registry.clone(), self.store.clone())
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Provision {
                claim,
                volume_name,
                reclaim_policy,
                parameters,
            } => {
                self.provision(&claim, volume_name, &reclaim_policy, parameters.into_iter().collect())
                    .await
            }
            Command::Delete { volume } => self.delete(&volume).await,
            Command::Snapshot(SnapshotCommand::Create { namespace, name }) => {
                let snapshot = self
                    .taker()
                    .create(&namespace, &name)
                    .await
                    .with_context(|| format!("Failed to take snapshot {}/{}", namespace, name))?;
                self.print(&snapshot)
            }
            Command::Snapshot(SnapshotCommand::Delete { namespace, name }) => {
                let snapshot = self
                    .taker()
                    .delete(&namespace, &name)
                    .await
                    .with_context(|| format!("Failed to delete snapshot {}/{}", namespace, name))?;
                self.print(&snapshot)
            }
            Command::Plugins => {
                for volume_type in self.registry.volume_types() {
                    println!("{}", volume_type);
                }
                Ok(())
            }
        }
    }

    fn print<T: Serialize>(&self, record: &T) -> Result<()> {
        match self.output {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(record)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        }
        Ok(())
    }

    async fn provision(
        &self,
        claim_path: &Path,
        volume_name: String,
        reclaim_policy: &str,
        parameters: HashMap<String, String>,
    ) -> Result<()> {
        let claim = read_claim(claim_path)?;
        let reclaim_policy: ReclaimPolicy = reclaim_policy.parse()?;

        let request = ProvisionRequest {
            volume_name,
            claim,
            reclaim_policy,
            parameters,
        };

        let provisioner = self.provisioner();
        let volume = provisioner
            .provision(&request)
            .await
            .with_context(|| format!("Failed to provision volume {}", request.volume_name))?;

        if let Err(e) = self.store.put_volume(&volume).await {
            // Nothing records the restored volume; remove it so it does not leak.
            if let Err(cleanup) = provisioner.delete(&volume).await {
                warn!(error = %cleanup, volume = %volume.name, "Failed to remove unrecorded volume");
            }
            return Err(anyhow::Error::new(e).context(format!("Failed to store volume {}", volume.name)));
        }

        self.print(&volume)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let volume = self
            .store
            .get_volume(name)
            .await?
            .with_context(|| format!("Volume {} not found", name))?;

        match self
            .provisioner()
            .delete(&volume)
            .await
            .with_context(|| format!("Failed to delete volume {}", name))?
        {
            DeleteOutcome::Deleted => {
                self.store.delete_volume(name).await?;
                println!("deleted {}", name);
            }
            DeleteOutcome::Skipped { owner } => {
                warn!(volume = %name, owner = %owner, "Volume belongs to another provisioner");
                println!("skipped {} (owned by {})", name, owner);
            }
        }
        Ok(())
    }
}

fn read_claim(path: &Path) -> Result<VolumeClaim> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read claim file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse claim file: {}", path.display()))
}
