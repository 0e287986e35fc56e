//! Error types for the snapshot engine.

use std::fmt;

use thiserror::Error;

/// Kind of record held by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Snapshot,
    SnapshotData,
    Volume,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Snapshot => write!(f, "Snapshot"),
            RecordKind::SnapshotData => write!(f, "SnapshotData"),
            RecordKind::Volume => write!(f, "Volume"),
        }
    }
}

/// Errors that can occur while taking, deleting or restoring snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Malformed input, or a record whose backend does not match the plugin.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// The claim carries no snapshot annotation.
    #[error("Annotation {0} not found on claim")]
    MissingAnnotation(String),

    /// A referenced record does not exist (yet).
    #[error("{kind} {namespace}/{name} not found")]
    RecordNotFound {
        kind: RecordKind,
        namespace: String,
        name: String,
    },

    /// The snapshot exists but is not bound to any snapshot data.
    #[error("Snapshot {0} is not bound to any SnapshotData")]
    UnboundSnapshot(String),

    /// No plugin is registered for the volume type, or no type could be determined.
    #[error("Unsupported volume type: {0}")]
    UnsupportedVolumeType(String),

    /// The backend operation itself failed.
    #[error("Backend operation failed: {0}")]
    BackendFailure(String),

    /// Restoring the snapshot failed inside the plugin.
    #[error("Failed to create a volume from snapshot {snapshot}: {source}")]
    RestoreFailed {
        snapshot: String,
        #[source]
        source: Box<SnapshotError>,
    },

    /// The volume carries no ownership annotation.
    #[error("Volume not owned: {0}")]
    NotOwned(String),

    /// The claim asks for something this engine cannot do.
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    /// Record store failure other than a missing record.
    #[error("Record store error: {0}")]
    Store(String),

    /// Provider or plugin configuration error.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SnapshotError {
    /// Shorthand for [`SnapshotError::RecordNotFound`].
    pub fn not_found(kind: RecordKind, namespace: &str, name: &str) -> Self {
        SnapshotError::RecordNotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Whether calling again without operator or caller action can succeed.
    ///
    /// Missing or unbound records may appear later and backend failures may be
    /// transient. Everything else needs the input or the deployment to change.
    pub fn is_retryable(&self) -> bool {
        match self {
            SnapshotError::RecordNotFound { .. }
            | SnapshotError::UnboundSnapshot(_)
            | SnapshotError::BackendFailure(_)
            | SnapshotError::RestoreFailed { .. }
            | SnapshotError::Store(_) => true,
            SnapshotError::InvalidSpec(_)
            | SnapshotError::MissingAnnotation(_)
            | SnapshotError::UnsupportedVolumeType(_)
            | SnapshotError::NotOwned(_)
            | SnapshotError::UnsupportedRequest(_)
            | SnapshotError::Config(_) => false,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;
