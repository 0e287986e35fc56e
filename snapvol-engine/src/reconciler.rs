//! Provisioning reconciler.
//!
//! Turns a claim that names a snapshot into a bound volume, and deletes
//! volumes this instance created. The reconciler holds no state of its own;
//! it reads records through a [`RecordStore`] and dispatches to the
//! [`PluginRegistry`].
//!
//! ## Preconditions
//!
//! Calls for different volumes may run concurrently. The caller must not run
//! two operations for the same volume name at once; there is no per-volume
//! locking here.
//!
//! ## Provision
//!
//! ```text
//! RequestReceived ─▶ SnapshotResolved ─▶ DataResolved ─▶ TypeResolved
//!                                                            │
//!                        VolumeAssembled ◀─ PluginInvoked ◀──┘
//! ```
//!
//! Any step may end in failure; nothing is written before the plugin runs, so
//! retrying after an early failure is safe.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{RecordKind, Result, SnapshotError};
use crate::plugin::{PluginRegistry, RestoredVolume};
use crate::store::RecordStore;
use crate::types::{
    ProvisionRequest, Volume, VolumeSpec, DEFAULT_NAMESPACE, PROVISIONER_ID_ANNOTATION,
    RESTORED_FROM_LABEL, SNAPSHOT_CLAIM_ANNOTATION,
};

/// Progress of a single provision call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    RequestReceived,
    SnapshotResolved,
    DataResolved,
    TypeResolved,
    PluginInvoked,
    VolumeAssembled,
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionPhase::RequestReceived => "RequestReceived",
            ProvisionPhase::SnapshotResolved => "SnapshotResolved",
            ProvisionPhase::DataResolved => "DataResolved",
            ProvisionPhase::TypeResolved => "TypeResolved",
            ProvisionPhase::PluginInvoked => "PluginInvoked",
            ProvisionPhase::VolumeAssembled => "VolumeAssembled",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The backend volume was removed.
    Deleted,
    /// Another provisioner instance owns the volume; nothing was done.
    Skipped { owner: String },
}

/// Restores snapshots into volumes and deletes the volumes it created.
pub struct Provisioner {
    identity: String,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordStore>,
}

impl Provisioner {
    pub fn new(
        identity: impl Into<String>,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            identity: identity.into(),
            registry,
            store,
        }
    }

    /// Identity written into the ownership annotation.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Provision a volume from the snapshot named by the claim.
    #[instrument(
        skip(self, request),
        fields(
            volume = %request.volume_name,
            claim = %format!("{}/{}", request.claim.namespace, request.claim.name),
        )
    )]
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<Volume> {
        let mut phase = ProvisionPhase::RequestReceived;

        match self.restore(request, &mut phase).await {
            Ok(volume) => {
                info!(source = ?volume.spec.source, "Volume provisioned from snapshot");
                Ok(volume)
            }
            Err(e) => {
                warn!(phase = %phase, error = %e, retryable = e.is_retryable(), "Provision failed");
                Err(e)
            }
        }
    }

    async fn restore(&self, request: &ProvisionRequest, phase: &mut ProvisionPhase) -> Result<Volume> {
        let claim = &request.claim;

        if claim.selector.is_some() {
            return Err(SnapshotError::UnsupportedRequest(
                "claim Selector is not supported".into(),
            ));
        }

        let snapshot_name = claim
            .snapshot_name()
            .ok_or_else(|| SnapshotError::MissingAnnotation(SNAPSHOT_CLAIM_ANNOTATION.into()))?;

        let snapshot = self
            .store
            .get_snapshot(&claim.namespace, snapshot_name)
            .await?
            .ok_or_else(|| {
                SnapshotError::not_found(RecordKind::Snapshot, &claim.namespace, snapshot_name)
            })?;
        *phase = ProvisionPhase::SnapshotResolved;

        let data_name = snapshot
            .snapshot_data_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SnapshotError::UnboundSnapshot(snapshot_name.to_string()))?;

        let data = self
            .store
            .get_snapshot_data(DEFAULT_NAMESPACE, data_name)
            .await?
            .ok_or_else(|| {
                SnapshotError::not_found(RecordKind::SnapshotData, DEFAULT_NAMESPACE, data_name)
            })?;
        *phase = ProvisionPhase::DataResolved;
        debug!(snapshot_data = %data_name, "Restoring from SnapshotData");

        let volume_type = data.source.volume_type()?.ok_or_else(|| {
            SnapshotError::UnsupportedVolumeType(format!(
                "no source populated in SnapshotData {}",
                data.name
            ))
        })?;
        let plugin = self.registry.get(volume_type)?;
        *phase = ProvisionPhase::TypeResolved;

        let restored = plugin
            .snapshot_restore(&data, claim, &request.volume_name, &request.parameters)
            .await
            .and_then(|restored| match restored.source.volume_type()? {
                Some(t) if t == volume_type => Ok(restored),
                other => Err(SnapshotError::InvalidSpec(format!(
                    "{} plugin returned a {:?} location",
                    volume_type, other
                ))),
            })
            .map_err(|e| SnapshotError::RestoreFailed {
                snapshot: snapshot_name.to_string(),
                source: Box::new(e),
            })?;
        *phase = ProvisionPhase::PluginInvoked;

        let volume = self.assemble(request, snapshot_name, restored);
        *phase = ProvisionPhase::VolumeAssembled;

        Ok(volume)
    }

    /// Wrap a restored location into a volume record owned by this instance.
    fn assemble(&self, request: &ProvisionRequest, snapshot_name: &str, restored: RestoredVolume) -> Volume {
        let mut volume = Volume {
            name: request.volume_name.clone(),
            annotations: Default::default(),
            labels: Default::default(),
            spec: VolumeSpec {
                capacity: request.claim.requested_storage.clone(),
                access_modes: request.claim.access_modes.clone(),
                reclaim_policy: request.reclaim_policy,
                source: restored.source,
            },
        };

        volume
            .annotations
            .insert(PROVISIONER_ID_ANNOTATION.to_string(), self.identity.clone());
        volume
            .labels
            .insert(RESTORED_FROM_LABEL.to_string(), snapshot_name.to_string());

        for (key, value) in restored.labels {
            if volume.labels.contains_key(&key) {
                debug!(label = %key, "Ignoring plugin label for reserved key");
                continue;
            }
            volume.labels.insert(key, value);
        }

        volume
    }

    /// Delete the backend volume behind a volume record this instance created.
    ///
    /// A volume owned by a different instance is left alone and reported as
    /// [`DeleteOutcome::Skipped`]; a volume with no owner at all is an error.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn delete(&self, volume: &Volume) -> Result<DeleteOutcome> {
        let owner = volume.owner().ok_or_else(|| {
            SnapshotError::NotOwned(format!(
                "identity annotation not found on volume {}",
                volume.name
            ))
        })?;

        if owner != self.identity {
            info!(owner = %owner, "Volume owned by another provisioner, skipping delete");
            return Ok(DeleteOutcome::Skipped {
                owner: owner.to_string(),
            });
        }

        let volume_type = volume.spec.source.volume_type()?.ok_or_else(|| {
            SnapshotError::UnsupportedVolumeType(format!(
                "no source populated in volume {}",
                volume.name
            ))
        })?;
        let plugin = self.registry.get(volume_type)?;

        plugin.volume_delete(volume).await?;

        info!(volume_type = %volume_type, "Volume deleted");
        Ok(DeleteOutcome::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{MockCall, MockPlugin};
    use crate::store::{MemoryRecordStore, RecordWriter};
    use crate::types::{
        LabelSelector, ReclaimPolicy, Snapshot, SnapshotData, SnapshotDataSource, VolumeClaim,
        VolumeSource, VolumeType,
    };

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        plugin: Arc<MockPlugin>,
        provisioner: Provisioner,
    }

    fn fixture_with(plugin: MockPlugin) -> Fixture {
        let plugin = Arc::new(plugin);
        let mut registry = PluginRegistry::new();
        registry.register(VolumeType::HostPath, plugin.clone());

        let store = Arc::new(MemoryRecordStore::new());
        let provisioner = Provisioner::new("prov-A", Arc::new(registry), store.clone());

        Fixture {
            store,
            plugin,
            provisioner,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockPlugin::new(VolumeType::HostPath))
    }

    async fn seed_bound_snapshot(store: &MemoryRecordStore, source: SnapshotDataSource) {
        store
            .put_snapshot(&Snapshot::new("default", "s1").bound_to("d1"))
            .await
            .unwrap();
        store
            .put_snapshot_data(DEFAULT_NAMESPACE, &SnapshotData::new("d1", source))
            .await
            .unwrap();
    }

    fn request() -> ProvisionRequest {
        let mut claim = VolumeClaim::new("default", "claim-1").from_snapshot("s1");
        claim.requested_storage = Some("1Gi".into());
        let mut request = ProvisionRequest::new("pv-1", claim);
        request.reclaim_policy = ReclaimPolicy::Retain;
        request
    }

    fn owned_volume(owner: Option<&str>) -> Volume {
        let mut volume = Volume::new("pv-1", VolumeSource::host_path("/restore/abc"));
        if let Some(owner) = owner {
            volume
                .annotations
                .insert(PROVISIONER_ID_ANNOTATION.into(), owner.into());
        }
        volume
    }

    #[tokio::test]
    async fn test_provision_assembles_volume() {
        let fx = fixture();
        seed_bound_snapshot(&fx.store, SnapshotDataSource::host_path("/tmp/abc.tgz")).await;

        let volume = fx.provisioner.provision(&request()).await.unwrap();

        assert_eq!(volume.name, "pv-1");
        assert_eq!(volume.owner(), Some("prov-A"));
        assert_eq!(volume.spec.capacity.as_deref(), Some("1Gi"));
        assert_eq!(volume.spec.reclaim_policy, ReclaimPolicy::Retain);
        assert_eq!(volume.spec.source, VolumeSource::host_path("/mock/restore/pv-1"));
        assert_eq!(volume.labels.get(RESTORED_FROM_LABEL).map(String::as_str), Some("s1"));
        assert_eq!(
            fx.plugin.calls(),
            vec![MockCall::SnapshotRestore {
                snapshot_data: "d1".into(),
                volume: "pv-1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_provision_rejects_selector() {
        let fx = fixture();
        let mut req = request();
        req.claim.selector = Some(LabelSelector::default());

        let err = fx.provisioner.provision(&req).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedRequest(_)));
    }

    #[tokio::test]
    async fn test_provision_missing_annotation() {
        let fx = fixture();
        let req = ProvisionRequest::new("pv-1", VolumeClaim::new("default", "claim-1"));

        let err = fx.provisioner.provision(&req).await.unwrap_err();
        assert!(matches!(err, SnapshotError::MissingAnnotation(_)));
    }

    #[tokio::test]
    async fn test_provision_missing_snapshot_is_stable() {
        let fx = fixture();

        for _ in 0..2 {
            let err = fx.provisioner.provision(&request()).await.unwrap_err();
            assert!(matches!(
                err,
                SnapshotError::RecordNotFound { kind: RecordKind::Snapshot, .. }
            ));
        }
        assert!(fx.plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_unbound_snapshot() {
        let fx = fixture();
        fx.store.put_snapshot(&Snapshot::new("default", "s1")).await.unwrap();

        for _ in 0..2 {
            let err = fx.provisioner.provision(&request()).await.unwrap_err();
            assert!(matches!(err, SnapshotError::UnboundSnapshot(_)));
        }
    }

    #[tokio::test]
    async fn test_provision_missing_snapshot_data() {
        let fx = fixture();
        fx.store
            .put_snapshot(&Snapshot::new("default", "s1").bound_to("d1"))
            .await
            .unwrap();

        let err = fx.provisioner.provision(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::RecordNotFound { kind: RecordKind::SnapshotData, .. }
        ));
    }

    #[tokio::test]
    async fn test_provision_empty_source_is_unsupported() {
        let fx = fixture();
        seed_bound_snapshot(&fx.store, SnapshotDataSource::default()).await;

        let err = fx.provisioner.provision(&request()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVolumeType(_)));
        assert!(fx.plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_unregistered_type() {
        let fx = fixture();
        let source = SnapshotDataSource {
            lvm: Some(crate::types::LvmSnapshotSource {
                volume_group: "vg0".into(),
                logical_volume: "snap-1".into(),
            }),
            ..Default::default()
        };
        seed_bound_snapshot(&fx.store, source).await;

        let err = fx.provisioner.provision(&request()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVolumeType(_)));
    }

    #[tokio::test]
    async fn test_provision_restore_failure_is_surfaced() {
        let fx = fixture_with(MockPlugin::new(VolumeType::HostPath).failing_restore("tar exited with 2"));
        seed_bound_snapshot(&fx.store, SnapshotDataSource::host_path("/tmp/abc.tgz")).await;

        let err = fx.provisioner.provision(&request()).await.unwrap_err();
        match err {
            SnapshotError::RestoreFailed { snapshot, source } => {
                assert_eq!(snapshot, "s1");
                assert!(matches!(*source, SnapshotError::BackendFailure(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plugin_labels_never_override_reserved() {
        let plugin = MockPlugin::new(VolumeType::HostPath)
            .with_restore_label(RESTORED_FROM_LABEL, "other")
            .with_restore_label("zone", "a");
        let fx = fixture_with(plugin);
        seed_bound_snapshot(&fx.store, SnapshotDataSource::host_path("/tmp/abc.tgz")).await;

        let volume = fx.provisioner.provision(&request()).await.unwrap();
        assert_eq!(volume.labels.get(RESTORED_FROM_LABEL).map(String::as_str), Some("s1"));
        assert_eq!(volume.labels.get("zone").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_delete_owned_volume() {
        let fx = fixture();
        let outcome = fx.provisioner.delete(&owned_volume(Some("prov-A"))).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(
            fx.plugin.calls(),
            vec![MockCall::VolumeDelete { volume: "pv-1".into() }]
        );
    }

    #[tokio::test]
    async fn test_delete_without_annotation_fails() {
        let fx = fixture();
        let err = fx.provisioner.delete(&owned_volume(None)).await.unwrap_err();
        assert!(matches!(err, SnapshotError::NotOwned(_)));
        assert!(fx.plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_foreign_volume_is_skipped() {
        let fx = fixture();
        let outcome = fx.provisioner.delete(&owned_volume(Some("prov-B"))).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Skipped { owner: "prov-B".into() });
        assert!(fx.plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unsupported_type() {
        let fx = fixture();
        let mut volume = Volume::new("pv-1", VolumeSource::lvm("vg0", "restore-1"));
        volume
            .annotations
            .insert(PROVISIONER_ID_ANNOTATION.into(), "prov-A".into());

        let err = fx.provisioner.delete(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVolumeType(_)));
    }
}
