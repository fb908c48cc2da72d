//! composing arenas into one root filesystem
//!
//! parts are placed parents first, so a later part at a deeper target
//! shadows what an earlier one put there. teardown runs strictly in
//! reverse.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::mkdir_placeholders;
use crate::progress::CancelToken;

use super::{Emplacement, Placer};

/// one source tree and where it goes in the assembled root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyPart {
    pub source_path: PathBuf,
    /// absolute within the assembled root, e.g. `/usr/local`
    pub target_path: PathBuf,
    pub writable: bool,
    pub bare_mount: bool,
}

impl AssemblyPart {
    pub fn new(source_path: impl Into<PathBuf>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            writable: false,
            bare_mount: false,
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn bare_mount(mut self, bare_mount: bool) -> Self {
        self.bare_mount = bare_mount;
        self
    }
}

/// an assembled root filesystem
///
/// dropping it tears down whatever is still placed.
pub struct Assembly {
    root: PathBuf,
    placed: Vec<Placed>,
}

/// one placement and the paths created to make room for it
struct Placed {
    emplacement: Box<dyn Emplacement>,
    created: Vec<PathBuf>,
}

impl Assembly {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// number of placements still standing
    pub fn len(&self) -> usize {
        self.placed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }

    /// undo every placement, last first
    ///
    /// every placement is attempted even after a failure, except those
    /// containing a target that could not be torn down: removing them
    /// would reach into whatever is still mounted there. the first failure
    /// is returned. calling it again is a no-op.
    pub fn teardown(&mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        let mut stuck: Vec<PathBuf> = Vec::new();
        while let Some(placed) = self.placed.pop() {
            let target = placed.emplacement.target().to_path_buf();
            let inside = stuck.iter().find(|s| s.starts_with(&target)).cloned();
            if let Some(inner) = inside {
                warn!(
                    path = %target.display(),
                    still_placed = %inner.display(),
                    "skipping teardown over a placement that is still in place"
                );
                stuck.push(target);
                continue;
            }
            if let Err(e) = placed.emplacement.teardown() {
                warn!(path = %target.display(), error = %e, "teardown failed");
                stuck.push(target);
                first.get_or_insert(e);
                continue;
            }
            if let Err(e) = remove_created(&placed.created) {
                warn!(path = %target.display(), error = %e, "failed to remove placeholders");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for Assembly {
    fn drop(&mut self) {
        if self.placed.is_empty() {
            return;
        }
        if let Err(e) = self.teardown() {
            warn!(root = %self.root.display(), error = %e, "teardown on drop failed");
        }
    }
}

/// place every part under `root`
///
/// on failure everything placed so far is torn down and the error returned.
pub fn assemble(
    placer: &dyn Placer,
    root: &Path,
    parts: &[AssemblyPart],
    cancel: &CancelToken,
) -> Result<Assembly> {
    let mut ordered: Vec<(PathBuf, &AssemblyPart)> = parts
        .iter()
        .map(|part| relative_target(part).map(|rel| (rel, part)))
        .collect::<Result<_>>()?;
    // stable: on equal targets the later part is placed last and wins
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut assembly = Assembly {
        root: root.to_path_buf(),
        placed: Vec::with_capacity(ordered.len()),
    };

    for (rel, part) in ordered {
        let target = root.join(&rel);
        let placed = cancel
            .check()
            .and_then(|()| prepare_target(root, &rel, part, &target))
            .and_then(|created| {
                match placer.place(
                    &part.source_path,
                    &target,
                    part.writable,
                    part.bare_mount,
                    cancel,
                ) {
                    Ok(emplacement) => Ok(Placed {
                        emplacement,
                        created,
                    }),
                    Err(e) => {
                        if let Err(cleanup) = remove_created(&created) {
                            warn!(error = %cleanup, "failed to remove placeholders");
                        }
                        Err(e)
                    }
                }
            });
        match placed {
            Ok(placed) => {
                debug!(
                    source = %part.source_path.display(),
                    dst = %target.display(),
                    "placed"
                );
                assembly.placed.push(placed);
            }
            Err(e) => {
                if let Err(teardown) = assembly.teardown() {
                    warn!(error = %teardown, "teardown after failed placement also failed");
                }
                return Err(e);
            }
        }
    }
    Ok(assembly)
}

/// the part's target as a path relative to the root
fn relative_target(part: &AssemblyPart) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for component in part.target_path.components() {
        match component {
            Component::Normal(c) => rel.push(c),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::Placement {
                    source_path: part.source_path.clone(),
                    target: part.target_path.clone(),
                    reason: "target escapes the root".to_string(),
                })
            }
        }
    }
    Ok(rel)
}

fn kind_name(is_dir: bool) -> &'static str {
    if is_dir {
        "directory"
    } else {
        "file"
    }
}

/// make sure the target exists with the same file type as the source
///
/// returns what had to be created, in creation order. on failure nothing
/// created here is left behind.
fn prepare_target(
    root: &Path,
    rel: &Path,
    part: &AssemblyPart,
    target: &Path,
) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if root.symlink_metadata().is_err() {
        fs::create_dir_all(root).with_path(root)?;
        created.push(root.to_path_buf());
    }
    match make_room(root, rel, part, target, &mut created) {
        Ok(()) => Ok(created),
        Err(e) => {
            if let Err(cleanup) = remove_created(&created) {
                warn!(error = %cleanup, "failed to remove placeholders");
            }
            Err(e)
        }
    }
}

fn make_room(
    root: &Path,
    rel: &Path,
    part: &AssemblyPart,
    target: &Path,
    created: &mut Vec<PathBuf>,
) -> Result<()> {
    let source = &part.source_path;
    let source_is_dir = fs::metadata(source).with_path(source)?.is_dir();
    let refuse = |reason: String| Error::Placement {
        source_path: source.clone(),
        target: target.to_path_buf(),
        reason,
    };
    let placeholders = |rel: &Path| {
        mkdir_placeholders(root, rel).map_err(|e| match e {
            Error::NotADirectory(path) => {
                refuse(format!("{} is not a directory", path.display()))
            }
            e => e,
        })
    };

    let parent = rel.parent().unwrap_or(Path::new(""));
    match target.symlink_metadata() {
        Ok(existing) => {
            // every component must be a real directory, even when the
            // target itself already exists
            created.extend(placeholders(parent)?);
            if existing.file_type().is_symlink() {
                return Err(refuse("target is a symlink".to_string()));
            }
            if existing.is_dir() != source_is_dir {
                return Err(Error::PlacementTypeMismatch {
                    source_path: source.clone(),
                    source_kind: kind_name(source_is_dir),
                    target: target.to_path_buf(),
                    target_kind: kind_name(existing.is_dir()),
                });
            }
            Ok(())
        }
        Err(_) if source_is_dir => {
            created.extend(placeholders(rel)?);
            Ok(())
        }
        Err(_) => {
            let dirs = placeholders(parent)?;
            created.extend(dirs.iter().cloned());
            // a mount point for a single file
            fs::write(target, b"").with_path(target)?;
            created.push(target.to_path_buf());
            fs::set_permissions(target, Permissions::from_mode(0o644)).with_path(target)?;
            let epoch = FileTime::from_unix_time(0, 0);
            filetime::set_file_times(target, epoch, epoch).with_path(target)?;
            // the new file bumped its parent
            for dir in &dirs {
                filetime::set_file_times(dir, epoch, epoch).with_path(dir)?;
            }
            Ok(())
        }
    }
}

/// remove paths made by [`prepare_target`], newest first
///
/// directories are removed only when empty; anything already gone is fine.
fn remove_created(created: &[PathBuf]) -> Result<()> {
    let mut first: Option<Error> = None;
    for path in created.iter().rev() {
        let removed = match path.symlink_metadata() {
            Ok(m) if m.is_dir() => fs::remove_dir(path),
            Ok(_) => fs::remove_file(path),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                first.get_or_insert(Error::Io {
                    path: path.clone(),
                    source: e,
                });
            }
        }
    }
    first.map_or(Ok(()), Err)
}
