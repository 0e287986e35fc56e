//! Host directory snapshot plugin.
//!
//! Snapshots are gzip'd tarballs written to a staging directory. Restoring
//! extracts the tarball into a fresh directory under the restore root, which
//! then becomes the new volume's path. Suitable for development and
//! single-node deployments.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::command;
use super::traits::{RestoredVolume, SnapshotPlugin};
use crate::cloud::CloudContext;
use crate::error::{Result, SnapshotError};
use crate::types::{SnapshotData, SnapshotDataSource, Volume, VolumeClaim, VolumeSource, VolumeType};

/// Default directory for snapshot archives.
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// Default directory under which restored volumes are created.
pub const DEFAULT_RESTORE_DIR: &str = "/restore";

/// Host path plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPathConfig {
    /// Where snapshot archives are written
    pub staging_dir: PathBuf,
    /// Where restored volumes are extracted
    pub restore_dir: PathBuf,
    /// tar binary path
    pub tar_path: String,
}

impl Default for HostPathConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            restore_dir: PathBuf::from(DEFAULT_RESTORE_DIR),
            tar_path: "tar".to_string(),
        }
    }
}

/// Host directory snapshot plugin.
pub struct HostPathPlugin {
    config: HostPathConfig,
}

impl HostPathPlugin {
    /// Create a plugin with the default directories.
    pub fn new() -> Self {
        Self::with_config(HostPathConfig::default())
    }

    pub fn with_config(config: HostPathConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostPathConfig {
        &self.config
    }

    /// Fresh archive path in the staging directory.
    fn artifact_path(&self) -> PathBuf {
        self.config
            .staging_dir
            .join(format!("{}.tgz", Uuid::new_v4()))
    }

    /// Fresh directory path under the restore root.
    fn restore_path(&self) -> PathBuf {
        self.config.restore_dir.join(Uuid::new_v4().to_string())
    }

    /// Whether `path` is a directory this plugin may have restored into.
    fn is_restored_path(&self, path: &Path) -> bool {
        path != self.config.restore_dir
            && path.starts_with(&self.config.restore_dir)
            && !path.components().any(|c| matches!(c, Component::ParentDir))
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            SnapshotError::BackendFailure(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Create the restore directory with mode 0750.
    async fn create_restore_dir(path: &Path) -> Result<()> {
        Self::ensure_dir(path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750))
                .await
                .map_err(|e| {
                    SnapshotError::BackendFailure(format!(
                        "Failed to set permissions on {}: {}",
                        path.display(),
                        e
                    ))
                })?;
        }

        Ok(())
    }
}

impl Default for HostPathPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotPlugin for HostPathPlugin {
    fn volume_type(&self) -> VolumeType {
        VolumeType::HostPath
    }

    fn init(&mut self, _cloud: &CloudContext) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn snapshot_create(&self, volume: &Volume) -> Result<SnapshotDataSource> {
        let source = volume.spec.source.host_path.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no hostPath source", volume.name))
        })?;

        Self::ensure_dir(&self.config.staging_dir).await?;
        let artifact = self.artifact_path();
        let artifact_str = artifact.to_string_lossy().to_string();

        // Archive the directory contents, not the directory itself, so that
        // extraction reproduces the tree at the top of the target.
        let result = command::run(
            &self.config.tar_path,
            &["-czf", &artifact_str, "-C", &source.path, "."],
        )
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&artifact).await;
            return Err(e);
        }

        info!(path = %source.path, artifact = %artifact_str, "Snapshot archive created");
        Ok(SnapshotDataSource::host_path(artifact_str))
    }

    #[instrument(skip(self, source))]
    async fn snapshot_delete(&self, source: &SnapshotDataSource) -> Result<()> {
        let src = source.host_path.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("invalid snapshot data source: {:?}", source))
        })?;

        match tokio::fs::remove_file(&src.path).await {
            Ok(()) => {
                info!(artifact = %src.path, "Snapshot archive removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(artifact = %src.path, "Snapshot archive already absent");
                Ok(())
            }
            Err(e) => Err(SnapshotError::BackendFailure(format!(
                "Failed to remove {}: {}",
                src.path, e
            ))),
        }
    }

    #[instrument(skip(self, data, _claim, _parameters), fields(snapshot_data = %data.name))]
    async fn snapshot_restore(
        &self,
        data: &SnapshotData,
        _claim: &VolumeClaim,
        volume_name: &str,
        _parameters: &HashMap<String, String>,
    ) -> Result<RestoredVolume> {
        let src = data.source.host_path.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!(
                "SnapshotData {} has no hostPath source",
                data.name
            ))
        })?;

        let dir = self.restore_path();
        let dir_str = dir.to_string_lossy().to_string();
        Self::create_restore_dir(&dir).await?;

        command::run(&self.config.tar_path, &["-xzf", &src.path, "-C", &dir_str])
            .await
            .map_err(|e| {
                SnapshotError::BackendFailure(format!(
                    "failed to restore {} to {}: {}",
                    src.path, dir_str, e
                ))
            })?;

        info!(artifact = %src.path, path = %dir_str, volume = %volume_name, "Snapshot restored");
        Ok(RestoredVolume::new(VolumeSource::host_path(dir_str)))
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn volume_delete(&self, volume: &Volume) -> Result<()> {
        let src = volume.spec.source.host_path.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no hostPath source", volume.name))
        })?;

        let path = Path::new(&src.path);
        if !self.is_restored_path(path) {
            return Err(SnapshotError::InvalidSpec(format!(
                "{} is not under the restore directory {}",
                src.path,
                self.config.restore_dir.display()
            )));
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                info!(path = %src.path, "Restored volume removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %src.path, "Restored volume already absent");
                Ok(())
            }
            Err(e) => Err(SnapshotError::BackendFailure(format!(
                "Failed to remove {}: {}",
                src.path, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_in(root: &Path) -> HostPathPlugin {
        HostPathPlugin::with_config(HostPathConfig {
            staging_dir: root.join("staging"),
            restore_dir: root.join("restore"),
            tar_path: "tar".to_string(),
        })
    }

    #[test]
    fn test_artifact_paths_are_unique() {
        let plugin = HostPathPlugin::new();
        let a = plugin.artifact_path();
        let b = plugin.artifact_path();
        assert_ne!(a, b);
        assert!(a.starts_with(DEFAULT_STAGING_DIR));
        assert!(a.to_string_lossy().ends_with(".tgz"));
    }

    #[test]
    fn test_is_restored_path() {
        let plugin = HostPathPlugin::new();
        assert!(plugin.is_restored_path(Path::new("/restore/abc")));
        assert!(!plugin.is_restored_path(Path::new("/restore")));
        assert!(!plugin.is_restored_path(Path::new("/restore/../etc")));
        assert!(!plugin.is_restored_path(Path::new("/var/lib/data")));
    }

    #[tokio::test]
    async fn test_create_rejects_other_backends() {
        let plugin = HostPathPlugin::new();
        let volume = Volume::new("pv-1", VolumeSource::lvm("vg0", "data"));
        let err = plugin.snapshot_create(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_snapshot_delete_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin_in(tmp.path());
        let source = SnapshotDataSource::host_path(tmp.path().join("gone.tgz").to_string_lossy());
        plugin.snapshot_delete(&source).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_failure_leaves_no_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin_in(tmp.path());
        let volume = Volume::new(
            "pv-1",
            VolumeSource::host_path(tmp.path().join("missing").to_string_lossy()),
        );

        let err = plugin.snapshot_create(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::BackendFailure(_)));

        let leftovers = std::fs::read_dir(tmp.path().join("staging")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_volume_delete_outside_restore_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin_in(tmp.path());
        let volume = Volume::new("pv-1", VolumeSource::host_path(tmp.path().to_string_lossy()));
        let err = plugin.volume_delete(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidSpec(_)));
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn test_restore_missing_artifact_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin_in(tmp.path());
        let data = SnapshotData::new(
            "d1",
            SnapshotDataSource::host_path(tmp.path().join("nope.tgz").to_string_lossy()),
        );
        let claim = VolumeClaim::new("default", "c1");

        let err = plugin
            .snapshot_restore(&data, &claim, "pv-1", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::BackendFailure(_)));
    }
}
