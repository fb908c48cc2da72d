use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{apply_metadata, copy_tree, create_file, read_metadata, remove_tree, CopyOptions};
use crate::progress::CancelToken;

use super::{Emplacement, Placer};

/// places a private copy of the source
///
/// always writable and always isolated, so it cannot honor bare placements.
pub struct CopyPlacer;

impl Placer for CopyPlacer {
    fn place(
        &self,
        src: &Path,
        dst: &Path,
        _writable: bool,
        bare: bool,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Emplacement>> {
        if bare {
            return Err(Error::Placement {
                source_path: src.to_path_buf(),
                target: dst.to_path_buf(),
                reason: "copy placer cannot provide a bare mount".to_string(),
            });
        }

        if src.is_dir() {
            // shadow whatever an earlier part left here, as a mount would
            clear_dir(dst)?;
            copy_tree(src, dst, &CopyOptions::new(cancel))?;
        } else {
            copy_file(src, dst)?;
        }
        Ok(Box::new(CopyEmplacement {
            target: dst.to_path_buf(),
        }))
    }
}

/// remove everything inside `dir`, keeping `dir` itself
fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::Io {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };
    for entry in entries {
        let entry = entry.with_path(dir)?;
        remove_tree(&entry.path())?;
    }
    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(meta) = read_metadata(src, &name)? else {
        return Err(Error::Placement {
            source_path: src.to_path_buf(),
            target: dst.to_path_buf(),
            reason: "source cannot be copied".to_string(),
        });
    };
    let mut input = File::open(src).with_path(src)?;
    let mut output = create_file(dst)?;
    io::copy(&mut input, &mut output).with_path(dst)?;
    drop(output);
    apply_metadata(dst, &meta)
}

struct CopyEmplacement {
    target: PathBuf,
}

impl Emplacement for CopyEmplacement {
    fn target(&self) -> &Path {
        &self.target
    }

    fn teardown(&self) -> Result<()> {
        remove_tree(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_copy_is_isolated() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("etc")).unwrap();
        fs::write(src.join("etc/hosts"), "orig").unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let placed = CopyPlacer
            .place(&src, &dst, true, false, &CancelToken::new())
            .unwrap();
        fs::write(dst.join("etc/hosts"), "changed").unwrap();
        assert_eq!(fs::read_to_string(src.join("etc/hosts")).unwrap(), "orig");

        placed.teardown().unwrap();
        assert!(!dst.exists());
        assert!(src.join("etc/hosts").is_file());
    }

    #[test]
    fn test_copy_shadows_existing_entries() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("hosts"), "new").unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(dst.join("old.d")).unwrap();
        fs::write(dst.join("stale"), "old").unwrap();
        fs::write(dst.join("hosts"), "old").unwrap();

        CopyPlacer
            .place(&src, &dst, true, false, &CancelToken::new())
            .unwrap();
        let mut names: Vec<_> = fs::read_dir(&dst)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["hosts"]);
        assert_eq!(fs::read_to_string(dst.join("hosts")).unwrap(), "new");
    }

    #[test]
    fn test_copy_single_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("resolv.conf");
        fs::write(&src, "nameserver 1.1.1.1\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o600)).unwrap();
        let dst = dir.path().join("placed");
        fs::write(&dst, "").unwrap();

        CopyPlacer
            .place(&src, &dst, false, false, &CancelToken::new())
            .unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "nameserver 1.1.1.1\n");
        assert_eq!(fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_copy_rejects_bare() {
        let dir = tempdir().unwrap();
        let err = CopyPlacer
            .place(dir.path(), &dir.path().join("x"), false, true, &CancelToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Assembly);
    }

    #[test]
    fn test_copy_cancelled() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = CopyPlacer
            .place(&src, &dir.path().join("dst"), true, false, &cancel)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
