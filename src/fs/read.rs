use std::fs::{self, FileType};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::libc;
use tracing::warn;

use crate::error::{Error, IoResultExt, Result};
use crate::types::{normalize_name, Metadata, TypeFlag, Xattr, MODE_MASK};

/// map a std file type onto a typeflag
///
/// sockets have no archive representation and map to None.
pub fn typeflag_of(ft: &FileType) -> Option<TypeFlag> {
    if ft.is_file() {
        Some(TypeFlag::Regular)
    } else if ft.is_dir() {
        Some(TypeFlag::Directory)
    } else if ft.is_symlink() {
        Some(TypeFlag::Symlink)
    } else if ft.is_block_device() {
        Some(TypeFlag::BlockDevice)
    } else if ft.is_char_device() {
        Some(TypeFlag::CharDevice)
    } else if ft.is_fifo() {
        Some(TypeFlag::Fifo)
    } else {
        None
    }
}

/// read a node's metadata from disk (does not follow symlinks)
///
/// `rel` is the node's path relative to the tree root ("" for the root).
/// returns None for node types that cannot be part of a ware.
pub fn read_metadata(path: &Path, rel: &str) -> Result<Option<Metadata>> {
    let meta = fs::symlink_metadata(path).with_path(path)?;
    let Some(typeflag) = typeflag_of(&meta.file_type()) else {
        warn!(path = %path.display(), "skipping socket, wares cannot carry sockets");
        return Ok(None);
    };

    let (devmajor, devminor) = if typeflag.is_device() {
        let rdev = meta.rdev();
        (
            nix::sys::stat::major(rdev) as u32,
            nix::sys::stat::minor(rdev) as u32,
        )
    } else {
        (0, 0)
    };

    let linkname = if typeflag == TypeFlag::Symlink {
        read_symlink_target(path)?
    } else {
        String::new()
    };

    Ok(Some(Metadata {
        name: normalize_name(rel, typeflag == TypeFlag::Directory),
        typeflag,
        mode: meta.mode() & MODE_MASK,
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime(),
        mtime_nanos: meta.mtime_nsec() as u32,
        linkname,
        devmajor,
        devminor,
        xattrs: read_xattrs(path)?,
    }))
}

/// read all extended attributes from a path, sorted by name
pub fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let mut xattrs = Vec::new();

    // list xattr names
    let names: Vec<String> = match xattr::list(path) {
        Ok(iter) => iter.map(|n| n.to_string_lossy().into_owned()).collect(),
        Err(e) => {
            // ENOTSUP/ENODATA means no xattr support or no xattrs, not an error
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(vec![]);
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            });
        }
    };

    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name, value)),
            // removed between list and get
            Ok(None) => {}
            Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {}
            Err(e) => {
                return Err(Error::Xattr {
                    path: path.to_path_buf(),
                    message: format!("failed to read {}: {}", name, e),
                });
            }
        }
    }

    // sort for determinism
    xattrs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    Ok(xattrs)
}

/// read symlink target
pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_path(path)?;
    Ok(target.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    #[test]
    fn test_read_regular() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "content").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let meta = read_metadata(&path, "file.txt").unwrap().unwrap();
        assert_eq!(meta.typeflag, TypeFlag::Regular);
        assert_eq!(meta.name, "./file.txt");
        assert_eq!(meta.mode, 0o640);
        assert!(meta.linkname.is_empty());
    }

    #[test]
    fn test_read_directory_root() {
        let dir = tempdir().unwrap();
        let meta = read_metadata(dir.path(), "").unwrap().unwrap();
        assert_eq!(meta.typeflag, TypeFlag::Directory);
        assert_eq!(meta.name, "./");
    }

    #[test]
    fn test_read_nested_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let meta = read_metadata(&dir.path().join("a/b"), "a/b").unwrap().unwrap();
        assert_eq!(meta.name, "./a/b/");
    }

    #[test]
    fn test_read_symlink_not_followed() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("link");
        symlink("/some/target/path", &link).unwrap();

        let meta = read_metadata(&link, "link").unwrap().unwrap();
        assert_eq!(meta.typeflag, TypeFlag::Symlink);
        assert_eq!(meta.linkname, "/some/target/path");
    }

    #[test]
    fn test_read_fifo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fifo");
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(0o644)).unwrap();

        let meta = read_metadata(&path, "fifo").unwrap().unwrap();
        assert_eq!(meta.typeflag, TypeFlag::Fifo);
    }

    #[test]
    fn test_read_missing_is_fatal() {
        let dir = tempdir().unwrap();
        let err = read_metadata(&dir.path().join("nope"), "nope").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_socket_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        assert!(read_metadata(&path, "sock").unwrap().is_none());
    }
}
