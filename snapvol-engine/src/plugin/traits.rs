//! Snapshot plugin trait definition.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::cloud::CloudContext;
use crate::error::Result;
use crate::types::{SnapshotData, SnapshotDataSource, Volume, VolumeClaim, VolumeSource, VolumeType};

/// Result of restoring a snapshot into a new backend volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredVolume {
    /// Location of the new volume
    pub source: VolumeSource,
    /// Labels to attach to the resulting volume record
    pub labels: BTreeMap<String, String>,
}

impl RestoredVolume {
    pub fn new(source: VolumeSource) -> Self {
        Self {
            source,
            labels: BTreeMap::new(),
        }
    }
}

/// Snapshot plugin trait - implemented by each volume technology.
///
/// The registry holds one plugin per [`VolumeType`] and the provisioner
/// routes every operation to the plugin matching the record's populated
/// source. Operations block until the backend finishes; there is no internal
/// timeout.
#[async_trait]
pub trait SnapshotPlugin: Send + Sync {
    /// Volume type this plugin serves.
    fn volume_type(&self) -> VolumeType;

    /// One-time setup with the provider handle.
    ///
    /// Called before the plugin is registered. Calling it again replaces the
    /// retained handle.
    fn init(&mut self, cloud: &CloudContext) -> Result<()>;

    /// Take a snapshot of a volume and return the artifact descriptor.
    ///
    /// Every call creates a new, uniquely named artifact.
    async fn snapshot_create(&self, volume: &Volume) -> Result<SnapshotDataSource>;

    /// Remove a snapshot artifact. An artifact that is already gone is not an error.
    async fn snapshot_delete(&self, source: &SnapshotDataSource) -> Result<()>;

    /// Materialize a new backend volume from a snapshot artifact.
    ///
    /// # Arguments
    /// * `data` - The snapshot artifact to restore
    /// * `claim` - The claim that asked for the volume
    /// * `volume_name` - Name of the volume record being provisioned
    /// * `parameters` - Storage class parameters
    async fn snapshot_restore(
        &self,
        data: &SnapshotData,
        claim: &VolumeClaim,
        volume_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<RestoredVolume>;

    /// Remove a backend volume created by a prior restore.
    async fn volume_delete(&self, volume: &Volume) -> Result<()>;
}
