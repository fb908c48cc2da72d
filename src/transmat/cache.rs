use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::fs::remove_tree;
use crate::hash::CommitId;
use crate::warehouse::SiloUri;
use crate::workspace::Workspace;

use super::dir::is_collision;
use super::{Arena, MaterializeOptions, ScanOptions, Transmat, TransmatKind};

/// keeps verified arenas in `<workspace>/committed/<id>`
///
/// a hit returns a shared arena without touching any warehouse. a miss
/// delegates to the wrapped transmat and renames the fresh arena into the
/// committed name; losing that rename to a concurrent fill discards our copy
/// and uses the winner's. materializations with attribute filters bypass
/// the cache, since their trees differ from the ware as stored.
pub struct CachingTransmat {
    inner: Arc<dyn Transmat>,
    workspace: Workspace,
}

impl CachingTransmat {
    pub fn new(inner: Arc<dyn Transmat>, workspace: Workspace) -> Self {
        Self { inner, workspace }
    }

    /// is ware `id` already cached
    pub fn contains(&self, id: &CommitId) -> bool {
        self.workspace.committed(id).is_dir()
    }

    fn promote(&self, arena: Arena) -> Result<Arena> {
        let (tmp, hash) = match arena.into_owned_path() {
            Ok(parts) => parts,
            // already shared (nested cache), nothing to move
            Err(shared) => return Ok(shared),
        };
        let dest = self.workspace.committed(&hash);

        match fs::rename(&tmp, &dest) {
            Ok(()) => debug!(%hash, "cached arena"),
            Err(e) if is_collision(&e) => {
                debug!(%hash, "arena cached concurrently, discarding ours");
                remove_tree(&tmp)?;
            }
            Err(e) => {
                let _ = remove_tree(&tmp);
                return Err(Error::Io {
                    path: dest,
                    source: e,
                });
            }
        }
        Ok(Arena::shared(dest, hash))
    }
}

impl Transmat for CachingTransmat {
    fn materialize(
        &self,
        kind: &TransmatKind,
        id: &CommitId,
        warehouses: &[SiloUri],
        opts: &MaterializeOptions,
    ) -> Result<Arena> {
        if !opts.filters.is_keep_all() {
            return self.inner.materialize(kind, id, warehouses, opts);
        }

        let cached = self.workspace.committed(id);
        if cached.is_dir() {
            debug!(%id, "arena cache hit");
            return Ok(Arena::shared(cached, id.clone()));
        }

        let arena = self.inner.materialize(kind, id, warehouses, opts)?;
        self.promote(arena)
    }

    fn scan(
        &self,
        kind: &TransmatKind,
        path: &Path,
        warehouses: &[SiloUri],
        opts: &ScanOptions,
    ) -> Result<CommitId> {
        self.inner.scan(kind, path, warehouses, opts)
    }
}
