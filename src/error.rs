use std::fmt;
use std::path::PathBuf;

use crate::hash::CommitId;

/// coarse classification of an [`Error`]
///
/// callers branch on the kind, never on the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// malformed kind, uri, filter or config; never retried
    Config,
    /// a warehouse could not be reached at all
    WarehouseUnavailable,
    /// a reachable warehouse does not have the requested ware
    WareNotFound,
    /// content does not match its expected hash, or is structurally broken
    WareCorrupt,
    /// placement, mount or copy failure while assembling a rootfs
    Assembly,
    /// the host (disk, permissions, workspace) is broken, not the data
    Internal,
    /// the operation was cancelled
    Cancelled,
    /// not yet classified
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config error",
            ErrorKind::WarehouseUnavailable => "warehouse unavailable",
            ErrorKind::WareNotFound => "ware not found",
            ErrorKind::WareCorrupt => "ware corrupt",
            ErrorKind::Assembly => "assembly error",
            ErrorKind::Internal => "internal error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// error type for transmat operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no transmat registered for kind {0:?}")]
    UnknownKind(String),

    #[error("invalid warehouse uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("transmat kind {kind:?} cannot use warehouse {uri}")]
    UnsupportedTransport { kind: String, uri: String },

    #[error("warehouse {0} is read-only")]
    ReadOnlyWarehouse(String),

    #[error("invalid filter {0:?}")]
    InvalidFilter(String),

    #[error("invalid placer {0:?}")]
    InvalidPlacer(String),

    #[error("invalid commit id {0:?}")]
    InvalidCommitId(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("warehouse {uri} unavailable: {reason}")]
    WarehouseUnavailable { uri: String, reason: String },

    #[error("ware {id} not found in warehouse {uri}")]
    WareNotFound { uri: String, id: CommitId },

    #[error("{}", exhausted_message(.id, .tried, .reachable))]
    WarehousesExhausted {
        id: CommitId,
        tried: usize,
        reachable: usize,
    },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: CommitId, actual: CommitId },

    #[error("corrupt ware: {0}")]
    CorruptWare(String),

    #[error("missing parent directory in tree: {0}")]
    MissingTree(String),

    #[error("path recorded more than once: {0}")]
    FileCollision(String),

    #[error("refusing to write through {0}: not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot place {source_path} at {target}: {reason}")]
    Placement {
        source_path: PathBuf,
        target: PathBuf,
        reason: String,
    },

    #[error("cannot place {source_kind} {source_path} onto {target_kind} {target}")]
    PlacementTypeMismatch {
        source_path: PathBuf,
        source_kind: &'static str,
        target: PathBuf,
        target_kind: &'static str,
    },

    #[error("mount at {target} failed: {source}")]
    Mount {
        target: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("unmount of {target} failed: {source}")]
    Unmount {
        target: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },

    #[error("cbor encoding error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unclassified error: {0}")]
    Unknown(String),
}

fn exhausted_message(id: &CommitId, tried: &usize, reachable: &usize) -> String {
    if *reachable == 0 {
        format!("ware {}: none of {} warehouses were reachable", id, tried)
    } else {
        format!(
            "ware {}: not found in any of {} reachable warehouses ({} tried)",
            id, reachable, tried
        )
    }
}

impl Error {
    /// classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownKind(_)
            | Error::InvalidUri { .. }
            | Error::UnsupportedTransport { .. }
            | Error::ReadOnlyWarehouse(_)
            | Error::InvalidFilter(_)
            | Error::InvalidPlacer(_)
            | Error::InvalidCommitId(_)
            | Error::Config(_) => ErrorKind::Config,

            Error::WarehouseUnavailable { .. } => ErrorKind::WarehouseUnavailable,
            Error::WareNotFound { .. } => ErrorKind::WareNotFound,
            Error::WarehousesExhausted { reachable, .. } => {
                if *reachable == 0 {
                    ErrorKind::WarehouseUnavailable
                } else {
                    ErrorKind::WareNotFound
                }
            }

            Error::HashMismatch { .. }
            | Error::CorruptWare(_)
            | Error::MissingTree(_)
            | Error::FileCollision(_)
            | Error::NotADirectory(_) => ErrorKind::WareCorrupt,

            Error::Placement { .. }
            | Error::PlacementTypeMismatch { .. }
            | Error::Mount { .. }
            | Error::Unmount { .. } => ErrorKind::Assembly,

            Error::Io { .. }
            | Error::Xattr { .. }
            | Error::CborEncode(_)
            | Error::ConfigSerialize(_) => ErrorKind::Internal,

            Error::Cancelled => ErrorKind::Cancelled,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// shorthand for a malformed-archive error
    pub(crate) fn corrupt(message: impl fmt::Display) -> Self {
        Error::CorruptWare(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
