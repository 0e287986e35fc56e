//! # snapvol Engine
//!
//! Restores volume snapshots into new volumes.
//!
//! A claim annotated with a snapshot name is turned into a bound volume by
//! asking the backend plugin for the snapshot's volume type to materialize the
//! snapshot artifact at a new location. Supported backends:
//! - **HostPath** - tarballs of local directories
//! - **RBD** - Ceph RBD snapshots and clones
//! - **LVM** - LVM snapshot volumes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │     Provisioner      │      │    SnapshotTaker     │
//! │  (provision, delete) │      │   (create, delete)   │
//! └──────────┬───────────┘      └──────────┬───────────┘
//!            │                             │
//!            ├──────────────┬──────────────┤
//!            ▼              ▼              ▼
//!   ┌────────────────┐  ┌────────────────────────┐
//!   │ PluginRegistry │  │ RecordStore / Writer   │
//!   └───────┬────────┘  └────────────────────────┘
//!           ▼
//!   HostPath │ RBD │ LVM
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snapvol_engine::{MemoryRecordStore, PluginConfig, PluginRegistry, ProvisionRequest,
//!     Provisioner, VolumeClaim};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(PluginRegistry::from_config(&PluginConfig::default()).await);
//!     let store = Arc::new(MemoryRecordStore::new());
//!     let provisioner = Provisioner::new("prov-A", registry, store);
//!
//!     let claim = VolumeClaim::new("default", "restored").from_snapshot("s1");
//!     let volume = provisioner
//!         .provision(&ProvisionRequest::new("pv-1", claim))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod cloud;
pub mod error;
pub mod plugin;
pub mod reconciler;
pub mod store;
pub mod taker;
pub mod types;

pub use cloud::{init_provider, CephContext, CloudContext, LvmContext, ProviderKind};
pub use error::{RecordKind, Result, SnapshotError};
pub use plugin::{
    HostPathConfig,
    HostPathPlugin,
    LvmPlugin,
    MockCall,
    MockPlugin,
    PluginConfig,
    PluginRegistry,
    ProviderConfig,
    RbdPlugin,
    RestoredVolume,
    SnapshotPlugin,
};
pub use reconciler::{DeleteOutcome, ProvisionPhase, Provisioner};
pub use store::{MemoryRecordStore, RecordStore, RecordWriter};
pub use taker::SnapshotTaker;
pub use types::*;
