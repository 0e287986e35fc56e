//! File-backed record store.
//!
//! Each record is one YAML file:
//!
//! ```text
//! <root>/snapshots/<namespace>/<name>.yaml
//! <root>/snapshotdata/<namespace>/<name>.yaml
//! <root>/volumes/<name>.yaml
//! ```
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so readers never see a partial record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snapvol_engine::{
    RecordStore, RecordWriter, Result, Snapshot, SnapshotData, SnapshotError, Volume,
};
use tracing::debug;

const SNAPSHOTS_DIR: &str = "snapshots";
const SNAPSHOT_DATA_DIR: &str = "snapshotdata";
const VOLUMES_DIR: &str = "volumes";

/// Record store persisting records as YAML files under a root directory.
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record names become file names, so they must be single path components.
    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(SnapshotError::InvalidSpec(format!(
                "'{}' is not a valid record name",
                name
            )));
        }
        Ok(())
    }

    fn namespaced_path(&self, dir: &str, namespace: &str, name: &str) -> Result<PathBuf> {
        Self::check_name(namespace)?;
        Self::check_name(name)?;
        Ok(self.root.join(dir).join(namespace).join(format!("{}.yaml", name)))
    }

    fn volume_path(&self, name: &str) -> Result<PathBuf> {
        Self::check_name(name)?;
        Ok(self.root.join(VOLUMES_DIR).join(format!("{}.yaml", name)))
    }

    async fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SnapshotError::Store(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_yaml::from_str(&content).map(Some).map_err(|e| {
            SnapshotError::Store(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    async fn write<T: Serialize>(path: &Path, record: &T) -> Result<()> {
        let content = serde_yaml::to_string(record)
            .map_err(|e| SnapshotError::Store(format!("Failed to encode record: {}", e)))?;

        let dir = path
            .parent()
            .ok_or_else(|| SnapshotError::Store(format!("{} has no parent", path.display())))?;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            SnapshotError::Store(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SnapshotError::Store(format!(
                "Failed to write {}: {}",
                tmp.display(),
                e
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SnapshotError::Store(format!(
                "Failed to move record into {}: {}",
                path.display(),
                e
            )));
        }

        debug!(path = %path.display(), "Record written");
        Ok(())
    }

    async fn remove(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::Store(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>> {
        Self::read(&self.namespaced_path(SNAPSHOTS_DIR, namespace, name)?).await
    }

    async fn get_snapshot_data(&self, namespace: &str, name: &str) -> Result<Option<SnapshotData>> {
        Self::read(&self.namespaced_path(SNAPSHOT_DATA_DIR, namespace, name)?).await
    }

    async fn get_volume(&self, name: &str) -> Result<Option<Volume>> {
        Self::read(&self.volume_path(name)?).await
    }
}

#[async_trait]
impl RecordWriter for FileRecordStore {
    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.namespaced_path(SNAPSHOTS_DIR, &snapshot.namespace, &snapshot.name)?;
        Self::write(&path, snapshot).await
    }

    async fn put_snapshot_data(&self, namespace: &str, data: &SnapshotData) -> Result<()> {
        let path = self.namespaced_path(SNAPSHOT_DATA_DIR, namespace, &data.name)?;
        Self::write(&path, data).await
    }

    async fn delete_snapshot_data(&self, namespace: &str, name: &str) -> Result<()> {
        Self::remove(&self.namespaced_path(SNAPSHOT_DATA_DIR, namespace, name)?).await
    }

    async fn put_volume(&self, volume: &Volume) -> Result<()> {
        Self::write(&self.volume_path(&volume.name)?, volume).await
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        Self::remove(&self.volume_path(name)?).await
    }
}
