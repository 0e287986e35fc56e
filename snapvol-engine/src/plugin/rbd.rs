//! Ceph RBD snapshot plugin.
//!
//! Snapshots are protected RBD snapshots; restoring clones the snapshot into
//! a new copy-on-write image, so restores are fast regardless of image size.
//!
//! ## Prerequisites
//! - Ceph cluster with an RBD pool
//! - `ceph-common` package installed (provides `rbd` CLI)
//! - Keyring for the configured user

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::command::{self, Removal};
use super::traits::{RestoredVolume, SnapshotPlugin};
use crate::cloud::{CephContext, CloudContext};
use crate::error::{Result, SnapshotError};
use crate::types::{
    RbdSnapshotSource, RbdVolumeSource, SnapshotData, SnapshotDataSource, Volume, VolumeClaim,
    VolumeSource, VolumeType,
};

/// Label carrying the RBD pool of a restored volume.
pub const RBD_POOL_LABEL: &str = "snapvol.io/rbd-pool";

/// Ceph RBD snapshot plugin.
pub struct RbdPlugin {
    ceph: Option<CephContext>,
}

impl RbdPlugin {
    /// Create an uninitialized plugin. `init` must supply a Ceph context.
    pub fn new() -> Self {
        Self { ceph: None }
    }

    fn context(&self) -> Result<&CephContext> {
        self.ceph
            .as_ref()
            .ok_or_else(|| SnapshotError::BackendFailure("rbd plugin not initialized".into()))
    }

    /// Get the RBD image spec (pool/namespace/image format).
    fn image_spec(ctx: &CephContext, pool: &str, image: &str) -> String {
        if ctx.namespace.is_empty() {
            format!("{}/{}", pool, image)
        } else {
            format!("{}/{}/{}", pool, ctx.namespace, image)
        }
    }

    /// Build common rbd CLI arguments for authentication.
    fn auth_args(ctx: &CephContext) -> Vec<String> {
        let mut args = vec![];

        if !ctx.monitors.is_empty() {
            args.push("--mon-host".to_string());
            args.push(ctx.monitors.join(","));
        }

        args.push("--id".to_string());
        args.push(ctx.user.clone());

        if !ctx.keyring_path.is_empty() {
            args.push("--keyring".to_string());
            args.push(ctx.keyring_path.clone());
        }

        args
    }

    /// Full argument vector: `args` followed by the authentication arguments.
    fn with_auth<'a>(args: &[&'a str], auth_args: &'a [String]) -> Vec<&'a str> {
        let mut all_args: Vec<&str> = Vec::with_capacity(args.len() + auth_args.len());
        all_args.extend(args);
        all_args.extend(auth_args.iter().map(|s| s.as_str()));
        all_args
    }

    /// Execute an rbd command with authentication arguments appended.
    async fn run_rbd(ctx: &CephContext, args: &[&str]) -> Result<String> {
        let auth_args = Self::auth_args(ctx);
        command::run(&ctx.rbd_path, &Self::with_auth(args, &auth_args)).await
    }

    /// Run an rbd removal, treating an absent target as done.
    async fn run_rbd_removal<F>(ctx: &CephContext, args: &[&str], spec: &str, is_absent: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let auth_args = Self::auth_args(ctx);
        let all_args = Self::with_auth(args, &auth_args);
        if command::run_removal(&ctx.rbd_path, &all_args, is_absent).await? == Removal::AlreadyAbsent {
            warn!(spec = %spec, "RBD target already absent");
        }
        Ok(())
    }
}

/// rbd reports a missing image or snapshot as ENOENT on its own `rbd:` line.
fn target_absent(stderr: &str) -> bool {
    stderr.lines().map(str::trim).any(|line| {
        line.starts_with("rbd:") && line.contains("(2) No such file or directory")
    })
}

/// An unprotect retry may find the snapshot already unprotected.
fn unprotect_done(stderr: &str) -> bool {
    target_absent(stderr) || stderr.contains("snap is already unprotected")
}

impl Default for RbdPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotPlugin for RbdPlugin {
    fn volume_type(&self) -> VolumeType {
        VolumeType::Rbd
    }

    fn init(&mut self, cloud: &CloudContext) -> Result<()> {
        match cloud {
            CloudContext::Ceph(ctx) => {
                self.ceph = Some(ctx.clone());
                Ok(())
            }
            other => Err(SnapshotError::Config(format!(
                "rbd plugin requires a ceph provider, got {:?}",
                other.kind()
            ))),
        }
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn snapshot_create(&self, volume: &Volume) -> Result<SnapshotDataSource> {
        let ctx = self.context()?;
        let src = volume.spec.source.rbd.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no rbd source", volume.name))
        })?;

        let snapshot = format!("snap-{}", Uuid::new_v4());
        let spec = format!("{}@{}", Self::image_spec(ctx, &src.pool, &src.image), snapshot);

        Self::run_rbd(ctx, &["snap", "create", &spec]).await?;
        // Clones need a protected parent snapshot.
        Self::run_rbd(ctx, &["snap", "protect", &spec]).await?;

        info!(snapshot = %spec, "RBD snapshot created");
        Ok(SnapshotDataSource {
            rbd: Some(RbdSnapshotSource {
                pool: src.pool.clone(),
                image: src.image.clone(),
                snapshot,
            }),
            ..Default::default()
        })
    }

    #[instrument(skip(self, source))]
    async fn snapshot_delete(&self, source: &SnapshotDataSource) -> Result<()> {
        let ctx = self.context()?;
        let src = source.rbd.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("invalid snapshot data source: {:?}", source))
        })?;

        let spec = format!("{}@{}", Self::image_spec(ctx, &src.pool, &src.image), src.snapshot);

        Self::run_rbd_removal(ctx, &["snap", "unprotect", &spec], &spec, unprotect_done).await?;
        Self::run_rbd_removal(ctx, &["snap", "rm", &spec], &spec, target_absent).await?;

        info!(snapshot = %spec, "RBD snapshot removed");
        Ok(())
    }

    #[instrument(skip(self, data, _claim, _parameters), fields(snapshot_data = %data.name))]
    async fn snapshot_restore(
        &self,
        data: &SnapshotData,
        _claim: &VolumeClaim,
        volume_name: &str,
        _parameters: &HashMap<String, String>,
    ) -> Result<RestoredVolume> {
        let ctx = self.context()?;
        let src = data.source.rbd.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("SnapshotData {} has no rbd source", data.name))
        })?;

        let parent = format!("{}@{}", Self::image_spec(ctx, &src.pool, &src.image), src.snapshot);
        let image = format!("restore-{}", Uuid::new_v4());
        let child = Self::image_spec(ctx, &src.pool, &image);

        Self::run_rbd(ctx, &["clone", &parent, &child]).await?;

        info!(parent = %parent, image = %child, volume = %volume_name, "RBD snapshot cloned");

        let mut restored = RestoredVolume::new(VolumeSource::rbd(RbdVolumeSource {
            pool: src.pool.clone(),
            image,
            monitors: ctx.monitors.clone(),
            user: ctx.user.clone(),
        }));
        restored
            .labels
            .insert(RBD_POOL_LABEL.to_string(), src.pool.clone());
        Ok(restored)
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn volume_delete(&self, volume: &Volume) -> Result<()> {
        let ctx = self.context()?;
        let src = volume.spec.source.rbd.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no rbd source", volume.name))
        })?;

        let spec = Self::image_spec(ctx, &src.pool, &src.image);
        Self::run_rbd_removal(ctx, &["rm", &spec], &spec, target_absent).await?;

        info!(image = %spec, "RBD image removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(namespace: &str) -> CephContext {
        CephContext {
            pool: "rbd".to_string(),
            monitors: vec!["10.0.0.1:6789".to_string(), "10.0.0.2:6789".to_string()],
            user: "snapvol".to_string(),
            keyring_path: "/etc/ceph/ceph.client.snapvol.keyring".to_string(),
            namespace: namespace.to_string(),
            rbd_path: "rbd".to_string(),
        }
    }

    #[test]
    fn test_image_spec_without_namespace() {
        assert_eq!(RbdPlugin::image_spec(&context(""), "rbd", "vol-123"), "rbd/vol-123");
    }

    #[test]
    fn test_image_spec_with_namespace() {
        assert_eq!(
            RbdPlugin::image_spec(&context("tenant1"), "rbd", "vol-123"),
            "rbd/tenant1/vol-123"
        );
    }

    #[test]
    fn test_auth_args() {
        let args = RbdPlugin::auth_args(&context(""));
        assert_eq!(
            args,
            vec![
                "--mon-host",
                "10.0.0.1:6789,10.0.0.2:6789",
                "--id",
                "snapvol",
                "--keyring",
                "/etc/ceph/ceph.client.snapvol.keyring",
            ]
        );
    }

    #[test]
    fn test_init_requires_ceph() {
        let mut plugin = RbdPlugin::new();
        assert!(plugin.init(&CloudContext::None).is_err());
        plugin.init(&CloudContext::Ceph(context(""))).unwrap();
        // A second init replaces the handle.
        plugin.init(&CloudContext::Ceph(context("tenant1"))).unwrap();
        assert_eq!(plugin.context().unwrap().namespace, "tenant1");
    }

    #[tokio::test]
    async fn test_uninitialized_plugin_fails() {
        let plugin = RbdPlugin::new();
        let volume = Volume::new(
            "pv-1",
            VolumeSource::rbd(RbdVolumeSource {
                pool: "rbd".into(),
                image: "vol".into(),
                monitors: vec![],
                user: String::new(),
            }),
        );
        let err = plugin.snapshot_create(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::BackendFailure(_)));
    }

    #[tokio::test]
    async fn test_restore_rejects_other_backends() {
        let mut plugin = RbdPlugin::new();
        plugin.init(&CloudContext::Ceph(context(""))).unwrap();
        let data = SnapshotData::new("d1", SnapshotDataSource::host_path("/tmp/abc.tgz"));
        let err = plugin
            .snapshot_restore(&data, &VolumeClaim::new("default", "c1"), "pv-1", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidSpec(_)));
    }

    #[test]
    fn test_target_absent_matches_enoent_only() {
        let missing = "2026-10-16T10:00:00.000+0000 7f1 -1 librbd::image::OpenRequest: failed to retrieve image id: (2) No such file or directory\n\
                       rbd: error opening image vol-1: (2) No such file or directory\n";
        assert!(target_absent(missing));

        let keyring = "2026-10-16T10:00:00.000+0000 7f1 -1 auth: unable to find a keyring on /etc/ceph/ceph.client.snapvol.keyring: (2) No such file or directory\n\
                       rbd: couldn't connect to the cluster!\n";
        assert!(!target_absent(keyring));

        assert!(!target_absent("rbd: error: image still has watchers\n"));
        assert!(unprotect_done("rbd: unprotecting snap failed: snap is already unprotected\n"));
    }

    #[tokio::test]
    async fn test_removals_fail_when_rbd_cannot_run() {
        let mut ctx = context("");
        ctx.rbd_path = "/nonexistent/rbd".to_string();
        let mut plugin = RbdPlugin::new();
        plugin.init(&CloudContext::Ceph(ctx)).unwrap();

        let volume = Volume::new(
            "pv-1",
            VolumeSource::rbd(RbdVolumeSource {
                pool: "rbd".into(),
                image: "restore-1".into(),
                monitors: vec![],
                user: String::new(),
            }),
        );
        let err = plugin.volume_delete(&volume).await.unwrap_err();
        assert!(matches!(err, SnapshotError::BackendFailure(_)));

        let source = SnapshotDataSource {
            rbd: Some(RbdSnapshotSource {
                pool: "rbd".into(),
                image: "vol".into(),
                snapshot: "snap-1".into(),
            }),
            ..Default::default()
        };
        let err = plugin.snapshot_delete(&source).await.unwrap_err();
        assert!(matches!(err, SnapshotError::BackendFailure(_)));
    }
}
