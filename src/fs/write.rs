use std::ffi::CString;
use std::fs::{self, File, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use nix::libc;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::types::{Metadata, TypeFlag, MODE_MASK};

/// create a non-regular node (directory, symlink, fifo, device) at `path`
///
/// regular files are written by the caller, which usually hashes the
/// content on the way. returns false if the node could not be created for
/// lack of privileges (device nodes) and was skipped.
pub fn create_node(path: &Path, meta: &Metadata) -> Result<bool> {
    match meta.typeflag {
        TypeFlag::Directory => {
            // a symlink to a directory is replaced, never reused
            match path.symlink_metadata() {
                Ok(m) if m.is_dir() => {}
                Ok(_) => {
                    remove_existing(path)?;
                    fs::create_dir(path).with_path(path)?;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    fs::create_dir_all(path).with_path(path)?
                }
                Err(e) => {
                    return Err(Error::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
            Ok(true)
        }
        TypeFlag::Symlink => {
            remove_existing(path)?;
            symlink(&meta.linkname, path).with_path(path)?;
            Ok(true)
        }
        TypeFlag::Fifo => {
            remove_existing(path)?;
            nix::unistd::mkfifo(path, Mode::from_bits_truncate(meta.mode)).map_err(|e| {
                Error::Io {
                    path: path.to_path_buf(),
                    source: e.into(),
                }
            })?;
            Ok(true)
        }
        TypeFlag::BlockDevice | TypeFlag::CharDevice => {
            remove_existing(path)?;
            let sflag = if meta.typeflag == TypeFlag::BlockDevice {
                SFlag::S_IFBLK
            } else {
                SFlag::S_IFCHR
            };
            let dev = makedev(meta.devmajor as u64, meta.devminor as u64);
            match mknod(path, sflag, Mode::from_bits_truncate(meta.mode), dev) {
                Ok(()) => Ok(true),
                Err(nix::errno::Errno::EPERM) => {
                    warn!(
                        path = %path.display(),
                        "cannot create device node without privileges, skipping"
                    );
                    Ok(false)
                }
                Err(e) => Err(Error::Io {
                    path: path.to_path_buf(),
                    source: e.into(),
                }),
            }
        }
        TypeFlag::Regular | TypeFlag::Hardlink => Err(Error::Unknown(format!(
            "create_node called for {} {}",
            meta.typeflag.type_name(),
            meta.name
        ))),
    }
}

/// create the missing parent directories of `base/rel` without following
/// symlinks
///
/// an existing component that is not a real directory is refused, so
/// nothing below `base` can be redirected elsewhere.
pub fn create_parents(base: &Path, rel: &Path) -> Result<()> {
    let Some(parent) = rel.parent() else {
        return Ok(());
    };
    let mut current = base.to_path_buf();
    for component in parent.components() {
        match component {
            Component::Normal(part) => current.push(part),
            Component::CurDir => continue,
            _ => return Err(Error::NotADirectory(base.join(rel))),
        }
        match current.symlink_metadata() {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Err(Error::NotADirectory(current)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir(&current).with_path(&current)?
            }
            Err(e) => {
                return Err(Error::Io {
                    path: current,
                    source: e,
                })
            }
        }
    }
    Ok(())
}

/// create (truncating) a regular file for content to be streamed into
pub fn create_file(path: &Path) -> Result<File> {
    if path.symlink_metadata().is_ok_and(|m| !m.is_file()) {
        remove_existing(path)?;
    }
    File::create(path).with_path(path)
}

/// create a hardlink
pub fn create_hardlink(link_path: &Path, target_path: &Path) -> Result<()> {
    remove_existing(link_path)?;
    fs::hard_link(target_path, link_path).with_path(link_path)
}

/// apply ownership, xattrs, mode and mtime to an existing node
///
/// ownership is only changed when it differs from the current user; an
/// unprivileged process that cannot chown keeps its own ids.
pub fn apply_metadata(path: &Path, meta: &Metadata) -> Result<()> {
    let is_symlink = meta.typeflag == TypeFlag::Symlink;

    // set xattrs first (while we still have write permission)
    for x in &meta.xattrs {
        if let Err(e) = xattr::set(path, &x.name, &x.value) {
            if is_symlink {
                // most filesystems refuse user xattrs on symlinks
                warn!(path = %path.display(), name = %x.name, error = %e, "failed to set xattr on symlink");
                continue;
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to set {}: {}", x.name, e),
            });
        }
    }

    chown_no_follow(path, meta.uid, meta.gid)?;

    // set mode (symlink modes are meaningless on linux)
    if !is_symlink {
        fs::set_permissions(path, Permissions::from_mode(meta.mode & MODE_MASK))
            .with_path(path)?;
    }

    let mtime = FileTime::from_unix_time(meta.mtime, meta.mtime_nanos);
    filetime::set_symlink_file_times(path, mtime, mtime).with_path(path)?;

    Ok(())
}

fn chown_no_follow(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let current_uid = nix::unistd::geteuid().as_raw();
    let current_gid = nix::unistd::getegid().as_raw();
    if uid == current_uid && gid == current_gid {
        return Ok(());
    }

    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(ErrorKind::InvalidInput, "invalid path"),
    })?;
    let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) && current_uid != 0 {
            debug!(path = %path.display(), uid, gid, "not privileged to chown, keeping current owner");
            return Ok(());
        }
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: err,
        });
    }
    Ok(())
}

/// remove whatever is at `path` unless it is a directory
fn remove_existing(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(m) if m.is_dir() => remove_tree(path),
        Ok(_) => fs::remove_file(path).with_path(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// recursively delete a tree, making directories writable first
///
/// a missing path is not an error.
pub fn remove_tree(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Ok(m) if !m.is_dir() => return fs::remove_file(path).with_path(path),
        Ok(_) => {}
    }

    for entry in WalkDir::new(path).follow_links(false) {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() {
            let _ = fs::set_permissions(entry.path(), Permissions::from_mode(0o700));
        }
    }
    fs::remove_dir_all(path).with_path(path)
}

/// create every missing directory from `base` down to `base/rel`
///
/// directories that already exist are left alone; new ones get placeholder
/// attributes (0755, epoch mtime) and are returned in creation order. an
/// existing component that is not a real directory is refused.
pub fn mkdir_placeholders(base: &Path, rel: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    match mkdir_each(base, rel, &mut created) {
        Ok(()) => Ok(created),
        Err(e) => {
            for dir in created.iter().rev() {
                let _ = fs::remove_dir(dir);
            }
            Err(e)
        }
    }
}

fn mkdir_each(base: &Path, rel: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let mut current = base.to_path_buf();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        current.push(part);
        match current.symlink_metadata() {
            Ok(m) if m.is_dir() => continue,
            Ok(_) => return Err(Error::NotADirectory(current)),
            Err(_) => {}
        }
        fs::create_dir(&current).with_path(&current)?;
        created.push(current.clone());
        fs::set_permissions(&current, Permissions::from_mode(0o755)).with_path(&current)?;
    }

    // creating a child bumps its parent's mtime, so stamp them all last
    let epoch = FileTime::from_unix_time(0, 0);
    for dir in created.iter() {
        filetime::set_file_times(dir, epoch, epoch).with_path(dir)?;
    }
    Ok(())
}
