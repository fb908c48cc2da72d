//! materializing and scanning wares
//!
//! a [`Transmat`] turns a stored ware into a directory on local disk (an
//! [`Arena`]) and turns a directory back into a stored ware, identified in
//! both directions by the tree hash. backends handle one serialized format
//! each; [`DispatchingTransmat`] routes by kind and [`CachingTransmat`]
//! keeps verified arenas around in the workspace.

mod cache;
mod dir;
mod dispatch;
mod tar;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::filter::Filters;
use crate::fs::remove_tree;
use crate::hash::CommitId;
use crate::progress::{CancelToken, NoProgress, ProgressSink};
use crate::warehouse::SiloUri;
use crate::workspace::Workspace;

pub use self::cache::CachingTransmat;
pub use self::dir::DirTransmat;
pub use self::dispatch::DispatchingTransmat;
pub use self::tar::TarTransmat;

/// name of a serialized ware format, e.g. "tar"
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransmatKind(String);

impl TransmatKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransmatKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for TransmatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TransmatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransmatKind({})", self.0)
    }
}

/// options for [`Transmat::materialize`]
#[derive(Clone)]
pub struct MaterializeOptions {
    /// return the arena even if its hash differs from the requested id
    pub accept_hash_mismatch: bool,
    /// rewrite attributes on disk after the ware has been verified
    pub filters: Filters,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancelToken,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            accept_hash_mismatch: false,
            filters: Filters::keep_all(),
            progress: Arc::new(NoProgress),
            cancel: CancelToken::new(),
        }
    }
}

/// options for [`Transmat::scan`]
#[derive(Clone)]
pub struct ScanOptions {
    /// rewrite attributes before hashing and storing
    pub filters: Filters,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancelToken,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            filters: Filters::keep_all(),
            progress: Arc::new(NoProgress),
            cancel: CancelToken::new(),
        }
    }
}

/// moves wares between warehouses and local disk
pub trait Transmat: Send + Sync {
    /// fetch ware `id` from the first warehouse that has it and unpack it
    /// into a fresh arena, verifying its hash
    fn materialize(
        &self,
        kind: &TransmatKind,
        id: &CommitId,
        warehouses: &[SiloUri],
        opts: &MaterializeOptions,
    ) -> Result<Arena>;

    /// hash the tree at `path` and, if warehouses are given, store it in
    /// every one of them under the computed id
    fn scan(
        &self,
        kind: &TransmatKind,
        path: &Path,
        warehouses: &[SiloUri],
        opts: &ScanOptions,
    ) -> Result<CommitId>;
}

/// a materialized tree on local disk
///
/// the tree must not be modified; use a placer to get a writable view.
/// arenas handed out by the cache are shared and their teardown is a no-op.
#[derive(Debug)]
pub struct Arena {
    path: PathBuf,
    hash: CommitId,
    /// directory removed on teardown, None for shared arenas
    cleanup: Option<PathBuf>,
    torn_down: AtomicBool,
}

impl Arena {
    /// an arena that owns its directory
    pub fn owned(path: PathBuf, hash: CommitId) -> Self {
        Self {
            cleanup: Some(path.clone()),
            path,
            hash,
            torn_down: AtomicBool::new(false),
        }
    }

    /// an arena over a directory someone else manages
    pub fn shared(path: PathBuf, hash: CommitId) -> Self {
        Self {
            path,
            hash,
            cleanup: None,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// hash of the tree actually on disk
    pub fn hash(&self) -> &CommitId {
        &self.hash
    }

    pub fn is_owned(&self) -> bool {
        self.cleanup.is_some()
    }

    /// release the arena; safe to call more than once
    pub fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(path) = &self.cleanup {
            debug!(path = %path.display(), hash = %self.hash, "tearing down arena");
            remove_tree(path)?;
        }
        Ok(())
    }

    /// take over an owned arena's directory without removing it
    ///
    /// shared arenas are handed back unchanged.
    pub(crate) fn into_owned_path(self) -> std::result::Result<(PathBuf, CommitId), Arena> {
        match self.cleanup {
            Some(path) if !self.torn_down.load(Ordering::SeqCst) => Ok((path, self.hash)),
            cleanup => Err(Arena {
                path: self.path,
                hash: self.hash,
                cleanup,
                torn_down: self.torn_down,
            }),
        }
    }
}

/// compare the hash of what was unpacked with what was asked for
pub(crate) fn verify(
    expected: &CommitId,
    actual: CommitId,
    accept_mismatch: bool,
) -> Result<CommitId> {
    if *expected == actual {
        return Ok(actual);
    }
    if accept_mismatch {
        warn!(%expected, %actual, "hash mismatch accepted");
        return Ok(actual);
    }
    Err(Error::HashMismatch {
        expected: expected.clone(),
        actual,
    })
}

/// run `fill` against a fresh tmp directory, removing it if `fill` fails
pub(crate) fn fill_arena<F>(workspace: &Workspace, fill: F) -> Result<Arena>
where
    F: FnOnce(&Path) -> Result<CommitId>,
{
    let dir = workspace.new_tmp_dir()?;
    match fill(&dir) {
        Ok(hash) => Ok(Arena::owned(dir, hash)),
        Err(e) => {
            if let Err(cleanup) = remove_tree(&dir) {
                warn!(path = %dir.display(), error = %cleanup, "failed to remove partial arena");
            }
            Err(e)
        }
    }
}

/// tar and dir backends behind a cache, behind a dispatcher
pub fn standard(workspace: &Workspace) -> DispatchingTransmat {
    let tar: Arc<dyn Transmat> = Arc::new(TarTransmat::new(workspace.clone()));
    let dir: Arc<dyn Transmat> = Arc::new(DirTransmat::new(workspace.clone()));
    DispatchingTransmat::new()
        .with(
            TarTransmat::KIND,
            Arc::new(CachingTransmat::new(tar, workspace.clone())),
        )
        .with(
            DirTransmat::KIND,
            Arc::new(CachingTransmat::new(dir, workspace.clone())),
        )
}
