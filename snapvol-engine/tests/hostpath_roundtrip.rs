//! Restore round trip through the host path plugin using the system `tar`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use snapvol_engine::{
    HostPathConfig, HostPathPlugin, MemoryRecordStore, PluginRegistry, ProvisionRequest,
    Provisioner, RecordWriter, Snapshot, SnapshotData, SnapshotPlugin, Volume, VolumeClaim,
    VolumeSource, VolumeType, DEFAULT_NAMESPACE, RESTORED_FROM_LABEL,
};
use tempfile::TempDir;

struct Dirs {
    _root: TempDir,
    source: std::path::PathBuf,
    config: HostPathConfig,
}

fn setup() -> Dirs {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    std::fs::create_dir_all(source.join("nested/deeper")).unwrap();
    std::fs::write(source.join("top.txt"), b"top level").unwrap();
    std::fs::write(source.join("nested/deeper/leaf.bin"), [0u8, 1, 2, 3, 255]).unwrap();

    let config = HostPathConfig {
        staging_dir: root.path().join("staging"),
        restore_dir: root.path().join("restore"),
        tar_path: "tar".to_string(),
    };
    std::fs::create_dir_all(&config.staging_dir).unwrap();

    Dirs {
        source,
        config,
        _root: root,
    }
}

fn source_volume(path: &Path) -> Volume {
    Volume::new("data-vol", VolumeSource::host_path(path.to_string_lossy()))
}

fn assert_same_tree(restored: &Path) {
    assert_eq!(std::fs::read(restored.join("top.txt")).unwrap(), b"top level");
    assert_eq!(
        std::fs::read(restored.join("nested/deeper/leaf.bin")).unwrap(),
        vec![0u8, 1, 2, 3, 255]
    );
}

#[tokio::test]
async fn test_snapshot_and_restore_reproduce_tree() {
    let dirs = setup();
    let plugin = HostPathPlugin::with_config(dirs.config.clone());

    let artifact = plugin.snapshot_create(&source_volume(&dirs.source)).await.unwrap();
    let archive = artifact.host_path.clone().unwrap().path;
    assert!(archive.ends_with(".tgz"));
    assert!(Path::new(&archive).starts_with(&dirs.config.staging_dir));

    let data = SnapshotData::new("d1", artifact);
    let claim = VolumeClaim::new("default", "claim-1").from_snapshot("s1");
    let restored = plugin
        .snapshot_restore(&data, &claim, "pv-1", &HashMap::new())
        .await
        .unwrap();

    let path = restored.source.host_path.unwrap().path;
    assert!(Path::new(&path).starts_with(&dirs.config.restore_dir));
    assert_same_tree(Path::new(&path));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }
}

#[tokio::test]
async fn test_concurrent_snapshots_get_distinct_artifacts() {
    let dirs = setup();
    let plugin = Arc::new(HostPathPlugin::with_config(dirs.config.clone()));
    let volume = source_volume(&dirs.source);

    let (a, b) = tokio::join!(plugin.snapshot_create(&volume), plugin.snapshot_create(&volume));
    let a = a.unwrap().host_path.unwrap().path;
    let b = b.unwrap().host_path.unwrap().path;

    assert_ne!(a, b);
    assert!(Path::new(&a).exists());
    assert!(Path::new(&b).exists());
}

#[tokio::test]
async fn test_snapshot_of_missing_directory_fails() {
    let dirs = setup();
    let plugin = HostPathPlugin::with_config(dirs.config.clone());
    let volume = source_volume(&dirs.source.join("absent"));

    assert!(plugin.snapshot_create(&volume).await.is_err());
    let leftovers = std::fs::read_dir(&dirs.config.staging_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_provision_and_delete_through_reconciler() {
    let dirs = setup();
    let plugin = Arc::new(HostPathPlugin::with_config(dirs.config.clone()));

    let artifact = plugin.snapshot_create(&source_volume(&dirs.source)).await.unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    store
        .put_snapshot(&Snapshot::new("default", "s1").bound_to("d1"))
        .await
        .unwrap();
    store
        .put_snapshot_data(DEFAULT_NAMESPACE, &SnapshotData::new("d1", artifact))
        .await
        .unwrap();

    let mut registry = PluginRegistry::new();
    registry.register(VolumeType::HostPath, plugin);
    let provisioner = Provisioner::new("prov-A", Arc::new(registry), store);

    let mut claim = VolumeClaim::new("default", "claim-1").from_snapshot("s1");
    claim.requested_storage = Some("1Gi".into());
    let volume = provisioner
        .provision(&ProvisionRequest::new("pv-1", claim))
        .await
        .unwrap();

    assert_eq!(volume.owner(), Some("prov-A"));
    assert_eq!(volume.labels.get(RESTORED_FROM_LABEL).map(String::as_str), Some("s1"));
    let path = volume.spec.source.host_path.clone().unwrap().path;
    assert_same_tree(Path::new(&path));

    provisioner.delete(&volume).await.unwrap();
    assert!(!Path::new(&path).exists());
}
