//! LVM snapshot plugin.
//!
//! Snapshots are thin snapshot LVs of the source volume. Restoring takes a
//! writable thin snapshot of the snapshot, which leaves the original artifact
//! untouched and reusable for further restores.
//!
//! ## Prerequisites
//! - `lvm2` package installed (with `thin-provisioning-tools`)
//! - The configured volume group holds a thin pool
//! - Source volumes are thin volumes in that pool (`lvcreate -T vg/pool -V size -n name`)

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::command::{self, Removal};
use super::traits::{RestoredVolume, SnapshotPlugin};
use crate::cloud::{CloudContext, LvmContext};
use crate::error::{Result, SnapshotError};
use crate::types::{
    LvmSnapshotSource, SnapshotData, SnapshotDataSource, Volume, VolumeClaim, VolumeSource,
    VolumeType,
};

/// LVM snapshot plugin.
pub struct LvmPlugin {
    lvm: Option<LvmContext>,
}

impl LvmPlugin {
    /// Create an uninitialized plugin. `init` must supply an LVM context.
    pub fn new() -> Self {
        Self { lvm: None }
    }

    fn context(&self) -> Result<&LvmContext> {
        self.lvm
            .as_ref()
            .ok_or_else(|| SnapshotError::BackendFailure("lvm plugin not initialized".into()))
    }

    /// Reject logical volumes outside the managed volume group.
    fn check_group(ctx: &LvmContext, volume_group: &str) -> Result<()> {
        if volume_group != ctx.volume_group {
            return Err(SnapshotError::InvalidSpec(format!(
                "volume group {} is not managed by this provisioner (expected {})",
                volume_group, ctx.volume_group
            )));
        }
        Ok(())
    }

    /// `lvm <subcommand> ...` so a single binary path covers every tool.
    async fn run_lvm(ctx: &LvmContext, args: &[&str]) -> Result<String> {
        command::run(&ctx.lvm_path, args).await
    }

    /// `lvcreate` arguments for a thin snapshot `name` of `vg/origin`.
    ///
    /// Thin snapshots take no size and may themselves be snapshotted. They
    /// carry the activation skip flag by default, so it is cleared here to
    /// get a usable device.
    fn snapshot_args(volume_group: &str, origin: &str, name: &str) -> Vec<String> {
        vec![
            "lvcreate".to_string(),
            "-s".to_string(),
            "--setactivationskip".to_string(),
            "n".to_string(),
            "-n".to_string(),
            name.to_string(),
            format!("{}/{}", volume_group, origin),
        ]
    }

    /// Create a thin snapshot LV named `name` of `vg/origin`.
    async fn create_snapshot_lv(ctx: &LvmContext, origin: &str, name: &str) -> Result<()> {
        let args = Self::snapshot_args(&ctx.volume_group, origin, name);
        let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        Self::run_lvm(ctx, &args).await?;
        info!(origin = %origin, snapshot = %name, volume_group = %ctx.volume_group, "Snapshot LV created");
        Ok(())
    }

    /// Remove `vg/name`, treating an absent LV as done.
    async fn remove_lv(ctx: &LvmContext, name: &str) -> Result<()> {
        let lv_path = format!("{}/{}", ctx.volume_group, name);
        let outcome = command::run_removal(&ctx.lvm_path, &["lvremove", "-f", &lv_path], |stderr| {
            lv_absent(stderr, &lv_path)
        })
        .await?;

        match outcome {
            Removal::Removed => info!(lv = %lv_path, "LV removed"),
            Removal::AlreadyAbsent => warn!(lv = %lv_path, "LV already absent"),
        }
        Ok(())
    }

    /// Device path of a logical volume.
    pub fn lv_path(volume_group: &str, name: &str) -> String {
        format!("/dev/{}/{}", volume_group, name)
    }
}

/// lvm names the exact LV it could not find.
fn lv_absent(stderr: &str, lv_path: &str) -> bool {
    stderr.contains(&format!("Failed to find logical volume \"{}\"", lv_path))
}

impl Default for LvmPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotPlugin for LvmPlugin {
    fn volume_type(&self) -> VolumeType {
        VolumeType::Lvm
    }

    fn init(&mut self, cloud: &CloudContext) -> Result<()> {
        match cloud {
            CloudContext::Lvm(ctx) => {
                self.lvm = Some(ctx.clone());
                Ok(())
            }
            other => Err(SnapshotError::Config(format!(
                "lvm plugin requires an lvm provider, got {:?}",
                other.kind()
            ))),
        }
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn snapshot_create(&self, volume: &Volume) -> Result<SnapshotDataSource> {
        let ctx = self.context()?;
        let src = volume.spec.source.lvm.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no lvm source", volume.name))
        })?;
        Self::check_group(ctx, &src.volume_group)?;

        let name = format!("snap-{}", Uuid::new_v4());
        Self::create_snapshot_lv(ctx, &src.logical_volume, &name).await?;

        Ok(SnapshotDataSource {
            lvm: Some(LvmSnapshotSource {
                volume_group: src.volume_group.clone(),
                logical_volume: name,
            }),
            ..Default::default()
        })
    }

    #[instrument(skip(self, source))]
    async fn snapshot_delete(&self, source: &SnapshotDataSource) -> Result<()> {
        let ctx = self.context()?;
        let src = source.lvm.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("invalid snapshot data source: {:?}", source))
        })?;
        Self::check_group(ctx, &src.volume_group)?;

        Self::remove_lv(ctx, &src.logical_volume).await
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
        let src = data.source.lvm.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("SnapshotData {} has no lvm source", data.name))
        })?;
        Self::check_group(ctx, &src.volume_group)?;

        let name = format!("restore-{}", Uuid::new_v4());
        Self::create_snapshot_lv(ctx, &src.logical_volume, &name).await?;

        info!(
            device = %Self::lv_path(&src.volume_group, &name),
            volume = %volume_name,
            "Snapshot restored"
        );
        Ok(RestoredVolume::new(VolumeSource::lvm(&src.volume_group, name)))
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    async fn volume_delete(&self, volume: &Volume) -> Result<()> {
        let ctx = self.context()?;
        let src = volume.spec.source.lvm.as_ref().ok_or_else(|| {
            SnapshotError::InvalidSpec(format!("volume {} has no lvm source", volume.name))
        })?;
        Self::check_group(ctx, &src.volume_group)?;

        Self::remove_lv(ctx, &src.logical_volume).await
    }
}
