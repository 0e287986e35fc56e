//! Snapshot taker.
//!
//! The only writer of Snapshot and SnapshotData records. It asks the plugin
//! for the source volume's type to produce an artifact, records the artifact
//! as SnapshotData in [`DEFAULT_NAMESPACE`] and binds the Snapshot to it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{RecordKind, Result, SnapshotError};
use crate::plugin::PluginRegistry;
use crate::store::RecordWriter;
use crate::types::{Snapshot, SnapshotData, DEFAULT_NAMESPACE};

/// Takes and deletes snapshot artifacts.
pub struct SnapshotTaker {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordWriter>,
}

impl SnapshotTaker {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<dyn RecordWriter>) -> Self {
        Self { registry, store }
    }

    async fn load(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        self.store
            .get_snapshot(namespace, name)
            .await?
            .ok_or_else(|| SnapshotError::not_found(RecordKind::Snapshot, namespace, name))
    }

    /// Take the snapshot and bind it to a new SnapshotData.
    ///
    /// A snapshot that is already bound is returned unchanged.
    #[instrument(skip(self), fields(snapshot = %format!("{}/{}", namespace, name)))]
    pub async fn create(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        let snapshot = self.load(namespace, name).await?;
        if let Some(bound) = snapshot.snapshot_data_name.as_deref().filter(|n| !n.is_empty()) {
            info!(snapshot_data = %bound, "Snapshot already bound");
            return Ok(snapshot);
        }

        let volume_name = snapshot.source_volume.as_deref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("snapshot {}/{} names no source volume", namespace, name))
        })?;
        let volume = self
            .store
            .get_volume(volume_name)
            .await?
            .ok_or_else(|| SnapshotError::not_found(RecordKind::Volume, "", volume_name))?;

        let volume_type = volume.spec.source.volume_type()?.ok_or_else(|| {
            SnapshotError::UnsupportedVolumeType(format!(
                "no source populated in volume {}",
                volume.name
            ))
        })?;
        let plugin = self.registry.get(volume_type)?;

        let source = plugin.snapshot_create(&volume).await?;

        let data = SnapshotData {
            name: format!("{}-{}", name, Uuid::new_v4()),
            origin_volume: Some(volume.name.clone()),
            created_at: Some(Utc::now()),
            source,
        };
        if let Err(e) = self.store.put_snapshot_data(DEFAULT_NAMESPACE, &data).await {
            // Nothing references the artifact yet; drop it so a retry starts clean.
            if let Err(cleanup) = plugin.snapshot_delete(&data.source).await {
                warn!(error = %cleanup, "Failed to remove unrecorded snapshot artifact");
            }
            return Err(e);
        }

        let bound = snapshot.bound_to(data.name.clone());
        if let Err(e) = self.store.put_snapshot(&bound).await {
            // The SnapshotData is unreferenced; drop it and its artifact.
            if let Err(cleanup) = self
                .store
                .delete_snapshot_data(DEFAULT_NAMESPACE, &data.name)
                .await
            {
                warn!(error = %cleanup, snapshot_data = %data.name, "Failed to remove unbound SnapshotData");
            }
            if let Err(cleanup) = plugin.snapshot_delete(&data.source).await {
                warn!(error = %cleanup, snapshot_data = %data.name, "Failed to remove unbound snapshot artifact");
            }
            return Err(e);
        }

        info!(
            snapshot_data = %data.name,
            volume = %volume.name,
            volume_type = %volume_type,
            "Snapshot taken"
        );
        Ok(bound)
    }

    /// Delete the artifact behind a snapshot and unbind it.
    ///
    /// An unbound snapshot is returned unchanged.
    #[instrument(skip(self), fields(snapshot = %format!("{}/{}", namespace, name)))]
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        let mut snapshot = self.load(namespace, name).await?;
        let Some(data_name) = snapshot.snapshot_data_name.clone().filter(|n| !n.is_empty()) else {
            info!("Snapshot not bound, nothing to delete");
            return Ok(snapshot);
        };

        match self.store.get_snapshot_data(DEFAULT_NAMESPACE, &data_name).await? {
            Some(data) => {
                let volume_type = data.source.volume_type()?.ok_or_else(|| {
                    SnapshotError::UnsupportedVolumeType(format!(
                        "no source populated in SnapshotData {}",
                        data.name
                    ))
                })?;
                let plugin = self.registry.get(volume_type)?;
                plugin.snapshot_delete(&data.source).await?;
                self.store
                    .delete_snapshot_data(DEFAULT_NAMESPACE, &data_name)
                    .await?;
            }
            None => {
                warn!(snapshot_data = %data_name, "Bound SnapshotData already gone");
            }
        }

        snapshot.snapshot_data_name = None;
        self.store.put_snapshot(&snapshot).await?;

        info!(snapshot_data = %data_name, "Snapshot deleted");
        Ok(snapshot)
    }
}
