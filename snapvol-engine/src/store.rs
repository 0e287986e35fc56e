//! Record store access.
//!
//! The provisioner only reads records. The snapshot taker also writes them,
//! through [`RecordWriter`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{Snapshot, SnapshotData, Volume};

/// Read access to Snapshot, SnapshotData and Volume records.
///
/// A missing record is `Ok(None)`; errors are reserved for store failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>>;

    async fn get_snapshot_data(&self, namespace: &str, name: &str) -> Result<Option<SnapshotData>>;

    async fn get_volume(&self, name: &str) -> Result<Option<Volume>>;
}

/// Write access for the components that produce records.
#[async_trait]
pub trait RecordWriter: RecordStore {
    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn put_snapshot_data(&self, namespace: &str, data: &SnapshotData) -> Result<()>;

    async fn delete_snapshot_data(&self, namespace: &str, name: &str) -> Result<()>;

    async fn put_volume(&self, volume: &Volume) -> Result<()>;

    async fn delete_volume(&self, name: &str) -> Result<()>;
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory record store for tests and development.
#[derive(Default)]
pub struct MemoryRecordStore {
    snapshots: RwLock<HashMap<Key, Snapshot>>,
    snapshot_data: RwLock<HashMap<Key, SnapshotData>>,
    volumes: RwLock<HashMap<String, Volume>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&key(namespace, name)).cloned())
    }

    async fn get_snapshot_data(&self, namespace: &str, name: &str) -> Result<Option<SnapshotData>> {
        Ok(self.snapshot_data.read().await.get(&key(namespace, name)).cloned())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<Volume>> {
        Ok(self.volumes.read().await.get(name).cloned())
    }
}

#[async_trait]
impl RecordWriter for MemoryRecordStore {
    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(key(&snapshot.namespace, &snapshot.name), snapshot.clone());
        Ok(())
    }

    async fn put_snapshot_data(&self, namespace: &str, data: &SnapshotData) -> Result<()> {
        self.snapshot_data
            .write()
            .await
            .insert(key(namespace, &data.name), data.clone());
        Ok(())
    }

    async fn delete_snapshot_data(&self, namespace: &str, name: &str) -> Result<()> {
        self.snapshot_data.write().await.remove(&key(namespace, name));
        Ok(())
    }

    async fn put_volume(&self, volume: &Volume) -> Result<()> {
        self.volumes
            .write()
            .await
            .insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.volumes.write().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotDataSource;

    #[tokio::test]
    async fn test_snapshots_are_namespaced() {
        let store = MemoryRecordStore::new();
        store.put_snapshot(&Snapshot::new("team-a", "s1")).await.unwrap();

        assert!(store.get_snapshot("team-a", "s1").await.unwrap().is_some());
        assert!(store.get_snapshot("team-b", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_data_delete() {
        let store = MemoryRecordStore::new();
        let data = SnapshotData::new("d1", SnapshotDataSource::host_path("/tmp/abc.tgz"));
        store.put_snapshot_data("default", &data).await.unwrap();
        assert_eq!(store.get_snapshot_data("default", "d1").await.unwrap(), Some(data));

        store.delete_snapshot_data("default", "d1").await.unwrap();
        assert!(store.get_snapshot_data("default", "d1").await.unwrap().is_none());
        // Deleting again is a no-op.
        store.delete_snapshot_data("default", "d1").await.unwrap();
    }
}
