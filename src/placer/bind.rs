use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fs::remove_tree;
use crate::progress::CancelToken;

use super::{Emplacement, Placer};

/// places the source itself with a recursive bind mount
///
/// read-only placements are remounted read-only. a writable placement
/// would write through to the source, so it is only allowed when bare.
pub struct BindPlacer;

impl Placer for BindPlacer {
    fn place(
        &self,
        src: &Path,
        dst: &Path,
        writable: bool,
        bare: bool,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Emplacement>> {
        if writable && !bare {
            return Err(Error::Placement {
                source_path: src.to_path_buf(),
                target: dst.to_path_buf(),
                reason: "bind placer cannot isolate a writable placement".to_string(),
            });
        }
        cancel.check()?;

        bind_mount(src, dst, writable)?;
        debug!(src = %src.display(), dst = %dst.display(), writable, "bind mounted");
        Ok(Box::new(MountEmplacement::new(dst.to_path_buf(), None)))
    }
}

/// bind `src` onto `dst`, read-only unless `writable`
pub(super) fn bind_mount(src: &Path, dst: &Path, writable: bool) -> Result<()> {
    mount(
        Some(src),
        dst,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|source| Error::Mount {
        target: dst.to_path_buf(),
        source,
    })?;

    if writable {
        return Ok(());
    }

    // the read-only flag is ignored on the initial bind
    let remount = mount(
        None::<&str>,
        dst,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
        None::<&str>,
    );
    if let Err(source) = remount {
        if let Err(e) = umount2(dst, MntFlags::MNT_DETACH) {
            warn!(path = %dst.display(), error = %e, "failed to undo bind mount");
        }
        return Err(Error::Mount {
            target: dst.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// a mount at `target`, plus an optional layer directory removed after it
pub(super) struct MountEmplacement {
    target: PathBuf,
    layer: Option<PathBuf>,
}

impl MountEmplacement {
    pub(super) fn new(target: PathBuf, layer: Option<PathBuf>) -> Self {
        Self { target, layer }
    }
}

impl Emplacement for MountEmplacement {
    fn target(&self) -> &Path {
        &self.target
    }

    fn teardown(&self) -> Result<()> {
        umount2(self.target.as_path(), MntFlags::MNT_DETACH).map_err(|source| {
            Error::Unmount {
                target: self.target.clone(),
                source,
            }
        })?;
        if let Some(layer) = &self.layer {
            remove_tree(layer)?;
        }
        Ok(())
    }
}
