use std::fs;
use std::path::Path;

use nix::mount::{mount, MsFlags};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::remove_tree;
use crate::progress::CancelToken;
use crate::workspace::Workspace;

use super::bind::{bind_mount, MountEmplacement};
use super::{CopyPlacer, Emplacement, Placer};

/// union filesystem backing a [`CowPlacer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CowFs {
    Overlay,
    Aufs,
}

impl CowFs {
    fn fstype(&self) -> &'static str {
        match self {
            CowFs::Overlay => "overlay",
            CowFs::Aufs => "aufs",
        }
    }

    /// mount options stacking a private `upper` over the read-only `lower`
    fn options(&self, lower: &Path, upper: &Path, work: &Path) -> String {
        match self {
            CowFs::Overlay => format!(
                "lowerdir={},upperdir={},workdir={}",
                lower.display(),
                upper.display(),
                work.display()
            ),
            CowFs::Aufs => format!("br={}=rw:{}=ro", upper.display(), lower.display()),
        }
    }
}

/// writable placements get a private upper layer over the untouched
/// source; read-only and bare placements fall back to a bind mount
pub struct CowPlacer {
    fs: CowFs,
    workspace: Workspace,
}

impl CowPlacer {
    pub fn new(fs: CowFs, workspace: Workspace) -> Self {
        Self { fs, workspace }
    }

    fn mount_layer(&self, src: &Path, dst: &Path, layer: &Path) -> Result<()> {
        let upper = layer.join("upper");
        let work = layer.join("work");
        for dir in [&upper, &work] {
            fs::create_dir(dir).with_path(dir)?;
        }
        let options = self.fs.options(src, &upper, &work);
        mount(
            Some(self.fs.fstype()),
            dst,
            Some(self.fs.fstype()),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|source| Error::Mount {
            target: dst.to_path_buf(),
            source,
        })
    }
}

impl Placer for CowPlacer {
    fn place(
        &self,
        src: &Path,
        dst: &Path,
        writable: bool,
        bare: bool,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Emplacement>> {
        cancel.check()?;
        if !writable || bare {
            bind_mount(src, dst, writable)?;
            return Ok(Box::new(MountEmplacement::new(dst.to_path_buf(), None)));
        }
        // union layers stack directories only
        if !src.is_dir() {
            return CopyPlacer.place(src, dst, writable, bare, cancel);
        }

        let layer = self.workspace.new_cow_dir()?;
        match self.mount_layer(src, dst, &layer) {
            Ok(()) => {
                debug!(
                    fs = self.fs.fstype(),
                    src = %src.display(),
                    dst = %dst.display(),
                    "mounted cow layer"
                );
                Ok(Box::new(MountEmplacement::new(dst.to_path_buf(), Some(layer))))
            }
            Err(e) => {
                let _ = remove_tree(&layer);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mount_options() {
        let lower = Path::new("/ws/committed/abc");
        let upper = Path::new("/ws/cow/t/upper");
        let work = Path::new("/ws/cow/t/work");
        assert_eq!(
            CowFs::Overlay.options(lower, upper, work),
            "lowerdir=/ws/committed/abc,upperdir=/ws/cow/t/upper,workdir=/ws/cow/t/work"
        );
        assert_eq!(
            CowFs::Aufs.options(lower, upper, work),
            "br=/ws/cow/t/upper=rw:/ws/committed/abc=ro"
        );
    }

    #[test]
    fn test_overlay_isolates_writes() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let supported = fs::read_to_string("/proc/filesystems")
            .map(|s| s.lines().any(|l| l.ends_with("overlay")))
            .unwrap_or(false);
        if !supported {
            return;
        }

        let dir = tempdir().unwrap();
        let ws = Workspace::open(&dir.path().join("ws")).unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("file"), "orig").unwrap();
        fs::create_dir(&dst).unwrap();

        let placer = CowPlacer::new(CowFs::Overlay, ws.clone());
        let placed = match placer.place(&src, &dst, true, false, &CancelToken::new()) {
            Ok(placed) => placed,
            // overlay on top of tmpfs or inside some containers is refused
            Err(_) => return,
        };
        fs::write(dst.join("file"), "changed").unwrap();
        assert_eq!(fs::read_to_string(src.join("file")).unwrap(), "orig");

        placed.teardown().unwrap();
        assert_eq!(fs::read_dir(ws.cow_path()).unwrap().count(), 0);
    }
}
