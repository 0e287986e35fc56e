//! Record types shared between the reconciler, the plugins and record producers.
//!
//! The annotation and label keys below are part of the contract with whatever
//! creates claims and snapshots, so they must not change.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// Claim annotation naming the snapshot to restore from.
pub const SNAPSHOT_CLAIM_ANNOTATION: &str = "snapshot.alpha.kubernetes.io/snapshot";

/// Volume annotation identifying the provisioner instance that created it.
pub const PROVISIONER_ID_ANNOTATION: &str = "snapshotProvisionerIdentity";

/// Name under which this provisioner serves claims.
pub const PROVISIONER_NAME: &str = "volumesnapshot.external-storage.k8s.io/snapshot-promoter";

/// Reserved volume label set to the snapshot a volume was restored from.
pub const RESTORED_FROM_LABEL: &str = "snapshot.alpha.kubernetes.io/restored-from";

/// Namespace holding SnapshotData records.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Volume technology tag used to pick a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    /// Local directory on the host
    #[serde(rename = "hostPath")]
    HostPath,
    /// Ceph RADOS block device
    #[serde(rename = "rbd")]
    Rbd,
    /// LVM logical volume
    #[serde(rename = "lvm")]
    Lvm,
}

impl VolumeType {
    /// All known volume types.
    pub const ALL: [VolumeType; 3] = [VolumeType::HostPath, VolumeType::Rbd, VolumeType::Lvm];

    /// Wire tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::HostPath => "hostPath",
            VolumeType::Rbd => "rbd",
            VolumeType::Lvm => "lvm",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        VolumeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SnapshotError::UnsupportedVolumeType(s.to_string()))
    }
}

/// Pick the single populated variant out of a one-field-per-backend union.
fn populated_type(candidates: &[(bool, VolumeType)]) -> Result<Option<VolumeType>> {
    let set: Vec<VolumeType> = candidates
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, t)| *t)
        .collect();

    match set.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => Err(SnapshotError::InvalidSpec(format!(
            "exactly one source must be set, found {}",
            many.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

// =============================================================================
// Volume sources
// =============================================================================

/// Directory on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPathVolumeSource {
    pub path: String,
}

/// RBD image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbdVolumeSource {
    pub pool: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monitors: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

/// LVM logical volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LvmVolumeSource {
    pub volume_group: String,
    pub logical_volume: String,
}

/// Backend location of a volume. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbd: Option<RbdVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm: Option<LvmVolumeSource>,
}

impl VolumeSource {
    pub fn host_path(path: impl Into<String>) -> Self {
        Self {
            host_path: Some(HostPathVolumeSource { path: path.into() }),
            ..Default::default()
        }
    }

    pub fn rbd(source: RbdVolumeSource) -> Self {
        Self {
            rbd: Some(source),
            ..Default::default()
        }
    }

    pub fn lvm(volume_group: impl Into<String>, logical_volume: impl Into<String>) -> Self {
        Self {
            lvm: Some(LvmVolumeSource {
                volume_group: volume_group.into(),
                logical_volume: logical_volume.into(),
            }),
            ..Default::default()
        }
    }

    /// The populated variant, `None` if nothing is set.
    ///
    /// Fails with `InvalidSpec` when more than one variant is set.
    pub fn volume_type(&self) -> Result<Option<VolumeType>> {
        populated_type(&[
            (self.host_path.is_some(), VolumeType::HostPath),
            (self.rbd.is_some(), VolumeType::Rbd),
            (self.lvm.is_some(), VolumeType::Lvm),
        ])
    }
}

// =============================================================================
// Snapshot artifact sources
// =============================================================================

/// Archive file produced from a host directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPathSnapshotSource {
    pub path: String,
}

/// Protected RBD snapshot `pool/image@snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbdSnapshotSource {
    pub pool: String,
    pub image: String,
    pub snapshot: String,
}

/// LVM snapshot volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LvmSnapshotSource {
    pub volume_group: String,
    pub logical_volume: String,
}

/// Where a snapshot artifact lives. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSnapshotSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbd: Option<RbdSnapshotSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm: Option<LvmSnapshotSource>,
}

impl SnapshotDataSource {
    pub fn host_path(path: impl Into<String>) -> Self {
        Self {
            host_path: Some(HostPathSnapshotSource { path: path.into() }),
            ..Default::default()
        }
    }

    /// The populated variant, `None` if nothing is set.
    ///
    /// Fails with `InvalidSpec` when more than one variant is set.
    pub fn volume_type(&self) -> Result<Option<VolumeType>> {
        populated_type(&[
            (self.host_path.is_some(), VolumeType::HostPath),
            (self.rbd.is_some(), VolumeType::Rbd),
            (self.lvm.is_some(), VolumeType::Lvm),
        ])
    }
}

// =============================================================================
// Records
// =============================================================================

/// User-facing request for a point-in-time copy of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub name: String,
    pub namespace: String,
    /// Bound SnapshotData, set once the artifact exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_data_name: Option<String>,
    /// Volume to take the snapshot of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_volume: Option<String>,
}

impl Snapshot {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            snapshot_data_name: None,
            source_volume: None,
        }
    }

    pub fn bound_to(mut self, data_name: impl Into<String>) -> Self {
        self.snapshot_data_name = Some(data_name.into());
        self
    }

    pub fn of_volume(mut self, volume_name: impl Into<String>) -> Self {
        self.source_volume = Some(volume_name.into());
        self
    }
}

/// Immutable descriptor of a snapshot artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub name: String,
    /// Volume the artifact was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub source: SnapshotDataSource,
}

impl SnapshotData {
    pub fn new(name: impl Into<String>, source: SnapshotDataSource) -> Self {
        Self {
            name: name.into(),
            origin_volume: None,
            created_at: None,
            source,
        }
    }
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

/// What happens to the backend volume once its claim is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Retain,
    #[default]
    Delete,
}

impl FromStr for ReclaimPolicy {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Retain" | "retain" => Ok(ReclaimPolicy::Retain),
            "Delete" | "delete" => Ok(ReclaimPolicy::Delete),
            other => Err(SnapshotError::InvalidSpec(format!("unknown reclaim policy {}", other))),
        }
    }
}

/// Provisioned volume specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Storage quantity, e.g. "10Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    pub source: VolumeSource,
}

/// A provisioned, usable storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: VolumeSpec,
}

impl Volume {
    /// Bare volume with only a name and a location.
    pub fn new(name: impl Into<String>, source: VolumeSource) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            spec: VolumeSpec {
                capacity: None,
                access_modes: Vec::new(),
                reclaim_policy: ReclaimPolicy::default(),
                source,
            },
        }
    }

    /// Identity of the provisioner that created this volume.
    pub fn owner(&self) -> Option<&str> {
        self.annotations.get(PROVISIONER_ID_ANNOTATION).map(String::as_str)
    }
}

/// Label selector on a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Request for storage that triggers a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaim {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Requested storage quantity, e.g. "10Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_storage: Option<String>,
}

impl VolumeClaim {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            annotations: BTreeMap::new(),
            selector: None,
            access_modes: vec![AccessMode::ReadWriteOnce],
            requested_storage: None,
        }
    }

    /// Set the snapshot annotation.
    pub fn from_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.annotations
            .insert(SNAPSHOT_CLAIM_ANNOTATION.to_string(), snapshot.into());
        self
    }

    /// Snapshot named by the claim annotation.
    pub fn snapshot_name(&self) -> Option<&str> {
        self.annotations.get(SNAPSHOT_CLAIM_ANNOTATION).map(String::as_str)
    }
}

/// Everything needed to provision one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Name of the volume to create
    pub volume_name: String,
    pub claim: VolumeClaim,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    /// Storage class parameters passed through to the plugin
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ProvisionRequest {
    pub fn new(volume_name: impl Into<String>, claim: VolumeClaim) -> Self {
        Self {
            volume_name: volume_name.into(),
            claim,
            reclaim_policy: ReclaimPolicy::default(),
            parameters: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_type_single_variant() {
        let source = SnapshotDataSource::host_path("/tmp/abc.tgz");
        assert_eq!(source.volume_type().unwrap(), Some(VolumeType::HostPath));

        let source = VolumeSource::lvm("vg0", "data");
        assert_eq!(source.volume_type().unwrap(), Some(VolumeType::Lvm));
    }

    #[test]
    fn test_volume_type_empty() {
        assert_eq!(SnapshotDataSource::default().volume_type().unwrap(), None);
        assert_eq!(VolumeSource::default().volume_type().unwrap(), None);
    }

    #[test]
    fn test_volume_type_rejects_multiple() {
        let mut source = SnapshotDataSource::host_path("/tmp/abc.tgz");
        source.rbd = Some(RbdSnapshotSource {
            pool: "rbd".into(),
            image: "vol".into(),
            snapshot: "snap".into(),
        });
        let err = source.volume_type().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidSpec(_)));
        assert!(err.to_string().contains("hostPath, rbd"));
    }

    #[test]
    fn test_volume_type_tags() {
        for t in VolumeType::ALL {
            assert_eq!(t.as_str().parse::<VolumeType>().unwrap(), t);
        }
        assert!("awsElasticBlockStore".parse::<VolumeType>().is_err());
    }

    #[test]
    fn test_claim_yaml() {
        let yaml = r#"
name: restored
namespace: team-a
annotations:
  snapshot.alpha.kubernetes.io/snapshot: s1
accessModes: [ReadWriteOnce]
requestedStorage: 1Gi
"#;
        let claim: VolumeClaim = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(claim.snapshot_name(), Some("s1"));
        assert_eq!(claim.requested_storage.as_deref(), Some("1Gi"));
        assert!(claim.selector.is_none());
    }

    #[test]
    fn test_volume_owner() {
        let mut volume = Volume::new("pv-1", VolumeSource::host_path("/restore/x"));
        assert_eq!(volume.owner(), None);
        volume
            .annotations
            .insert(PROVISIONER_ID_ANNOTATION.into(), "prov-A".into());
        assert_eq!(volume.owner(), Some("prov-A"));
    }
}
