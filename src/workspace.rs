use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IoResultExt, Result};
use crate::fs::remove_tree;
use crate::hash::CommitId;

/// on-disk work area shared by transmats and placers
///
/// ```text
/// <root>/tmp/<token>        in-progress arenas
/// <root>/committed/<id>     cached arenas, promoted by rename
/// <root>/cow/<token>        copy-on-write upper and work layers
/// ```
///
/// everything under `tmp` and `cow` belongs to a live operation; `committed`
/// entries are immutable once renamed into place.
#[derive(Clone, Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// open a workspace, creating its layout if needed
    pub fn open(path: &Path) -> Result<Self> {
        let ws = Self {
            path: path.to_path_buf(),
        };
        for dir in [ws.tmp_path(), ws.committed_path(), ws.cow_path()] {
            fs::create_dir_all(&dir).with_path(&dir)?;
        }
        Ok(ws)
    }

    /// workspace root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// path to tmp directory (for arenas being filled)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// path to committed directory
    pub fn committed_path(&self) -> PathBuf {
        self.path.join("committed")
    }

    /// path a cached arena for `id` lives at
    pub fn committed(&self, id: &CommitId) -> PathBuf {
        self.committed_path().join(id.as_str())
    }

    /// path to cow layer directory
    pub fn cow_path(&self) -> PathBuf {
        self.path.join("cow")
    }

    /// fresh, unique path under tmp (not created)
    pub fn tmp_name(&self) -> PathBuf {
        self.tmp_path().join(token())
    }

    /// create a fresh, empty directory under tmp
    pub fn new_tmp_dir(&self) -> Result<PathBuf> {
        let dir = self.tmp_name();
        fs::create_dir(&dir).with_path(&dir)?;
        Ok(dir)
    }

    /// create a fresh, empty directory under cow
    pub fn new_cow_dir(&self) -> Result<PathBuf> {
        let dir = self.cow_path().join(token());
        fs::create_dir(&dir).with_path(&dir)?;
        Ok(dir)
    }

    /// remove leftovers of interrupted operations from tmp
    ///
    /// only safe while no operation is using this workspace.
    pub fn purge_tmp(&self) -> Result<usize> {
        let tmp = self.tmp_path();
        let mut removed = 0;
        for entry in fs::read_dir(&tmp).with_path(&tmp)? {
            let entry = entry.with_path(&tmp)?;
            if let Err(e) = remove_tree(&entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "failed to purge tmp entry");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

/// random name component for temp files and directories
pub fn token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_workspace_layout() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(&dir.path().join("ws")).unwrap();

        assert!(ws.tmp_path().is_dir());
        assert!(ws.committed_path().is_dir());
        assert!(ws.cow_path().is_dir());

        let id = CommitId::parse("abc").unwrap();
        assert_eq!(ws.committed(&id), dir.path().join("ws/committed/abc"));

        // reopening is fine
        Workspace::open(ws.path()).unwrap();
    }

    #[test]
    fn test_tmp_dirs_are_unique() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let a = ws.new_tmp_dir().unwrap();
        let b = ws.new_tmp_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(ws.tmp_path()));
        assert!(ws.new_cow_dir().unwrap().starts_with(ws.cow_path()));
    }

    #[test]
    fn test_purge_tmp() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let a = ws.new_tmp_dir().unwrap();
        fs::write(a.join("file"), "x").unwrap();
        ws.new_tmp_dir().unwrap();

        assert_eq!(ws.purge_tmp().unwrap(), 2);
        assert_eq!(fs::read_dir(ws.tmp_path()).unwrap().count(), 0);
    }
}
