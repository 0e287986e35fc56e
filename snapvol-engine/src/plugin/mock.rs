//! Mock snapshot plugin for testing and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::traits::{RestoredVolume, SnapshotPlugin};
use crate::cloud::CloudContext;
use crate::error::{Result, SnapshotError};
use crate::types::{
    LvmSnapshotSource, RbdSnapshotSource, RbdVolumeSource, SnapshotData, SnapshotDataSource,
    Volume, VolumeClaim, VolumeSource, VolumeType,
};

/// A call received by [`MockPlugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Init,
    SnapshotCreate { volume: String },
    SnapshotDelete,
    SnapshotRestore { snapshot_data: String, volume: String },
    VolumeDelete { volume: String },
}

/// Mock plugin that records calls and fabricates locations in memory.
///
/// Useful for exercising the provisioner without touching any backend.
pub struct MockPlugin {
    volume_type: VolumeType,
    calls: Mutex<Vec<MockCall>>,
    restore_error: Option<String>,
    restore_labels: BTreeMap<String, String>,
}

impl MockPlugin {
    pub fn new(volume_type: VolumeType) -> Self {
        Self {
            volume_type,
            calls: Mutex::new(Vec::new()),
            restore_error: None,
            restore_labels: BTreeMap::new(),
        }
    }

    /// Make every restore fail with a backend failure.
    pub fn failing_restore(mut self, message: impl Into<String>) -> Self {
        self.restore_error = Some(message.into());
        self
    }

    /// Labels returned by every restore.
    pub fn with_restore_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.restore_labels.insert(key.into(), value.into());
        self
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockCall) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| SnapshotError::BackendFailure("Lock poisoned".to_string()))?
            .push(call);
        Ok(())
    }

    fn artifact(&self, id: &str) -> SnapshotDataSource {
        match self.volume_type {
            VolumeType::HostPath => SnapshotDataSource::host_path(format!("/mock/snapshots/{}.tgz", id)),
            VolumeType::Rbd => SnapshotDataSource {
                rbd: Some(RbdSnapshotSource {
                    pool: "mock".into(),
                    image: "mock".into(),
                    snapshot: id.to_string(),
                }),
                ..Default::default()
            },
            VolumeType::Lvm => SnapshotDataSource {
                lvm: Some(LvmSnapshotSource {
                    volume_group: "mock".into(),
                    logical_volume: id.to_string(),
                }),
                ..Default::default()
            },
        }
    }

    fn location(&self, volume_name: &str) -> VolumeSource {
        match self.volume_type {
            VolumeType::HostPath => VolumeSource::host_path(format!("/mock/restore/{}", volume_name)),
            VolumeType::Rbd => VolumeSource::rbd(RbdVolumeSource {
                pool: "mock".into(),
                image: volume_name.to_string(),
                monitors: vec![],
                user: String::new(),
            }),
            VolumeType::Lvm => VolumeSource::lvm("mock", volume_name),
        }
    }
}

#[async_trait]
impl SnapshotPlugin for MockPlugin {
    fn volume_type(&self) -> VolumeType {
        self.volume_type
    }

    fn init(&mut self, _cloud: &CloudContext) -> Result<()> {
        self.record(MockCall::Init)
    }

    async fn snapshot_create(&self, volume: &Volume) -> Result<SnapshotDataSource> {
        self.record(MockCall::SnapshotCreate {
            volume: volume.name.clone(),
        })?;
        Ok(self.artifact(&uuid::Uuid::new_v4().to_string()))
    }

    async fn snapshot_delete(&self, _source: &SnapshotDataSource) -> Result<()> {
        self.record(MockCall::SnapshotDelete)
    }

    async fn snapshot_restore(
        &self,
        data: &SnapshotData,
        _claim: &VolumeClaim,
        volume_name: &str,
        _parameters: &HashMap<String, String>,
    ) -> Result<RestoredVolume> {
        self.record(MockCall::SnapshotRestore {
            snapshot_data: data.name.clone(),
            volume: volume_name.to_string(),
        })?;

        if let Some(message) = &self.restore_error {
            return Err(SnapshotError::BackendFailure(message.clone()));
        }

        info!(volume = %volume_name, "Mock snapshot restored");
        Ok(RestoredVolume {
            source: self.location(volume_name),
            labels: self.restore_labels.clone(),
        })
    }

    async fn volume_delete(&self, volume: &Volume) -> Result<()> {
        self.record(MockCall::VolumeDelete {
            volume: volume.name.clone(),
        })
    }
}
