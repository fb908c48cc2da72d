//! wares stored as plain directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{apply_filters, copy_tree, remove_tree, scan_tree, CopyOptions};
use crate::hash::CommitId;
use crate::warehouse::{self, SiloUri};
use crate::workspace::{token, Workspace};

use super::{fill_arena, verify, Arena, MaterializeOptions, ScanOptions, Transmat, TransmatKind};

/// wares kept as unpacked directories in `file` / `file+ca` warehouses
pub struct DirTransmat {
    workspace: Workspace,
}

impl DirTransmat {
    pub const KIND: &'static str = "dir";

    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn check_kind(kind: &TransmatKind) -> Result<()> {
        if kind.as_str() != Self::KIND {
            return Err(Error::UnknownKind(kind.to_string()));
        }
        Ok(())
    }
}

fn local_base(uri: &SiloUri) -> Result<PathBuf> {
    uri.local_path().ok_or_else(|| Error::UnsupportedTransport {
        kind: DirTransmat::KIND.to_string(),
        uri: uri.to_string(),
    })
}

/// locate ware `id` in one warehouse
fn locate(uri: &SiloUri, id: &CommitId) -> Result<PathBuf> {
    let base = local_base(uri)?;
    let anchor = if uri.is_content_addressed() {
        base.clone()
    } else {
        base.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    if !anchor.as_os_str().is_empty() && !anchor.is_dir() {
        return Err(Error::WarehouseUnavailable {
            uri: uri.to_string(),
            reason: format!("{} is not a directory", anchor.display()),
        });
    }

    let path = uri.ware_path(id).unwrap_or(base);
    if !path.is_dir() {
        return Err(Error::WareNotFound {
            uri: uri.to_string(),
            id: id.clone(),
        });
    }
    Ok(path)
}

impl Transmat for DirTransmat {
    fn materialize(
        &self,
        kind: &TransmatKind,
        id: &CommitId,
        warehouses: &[SiloUri],
        opts: &MaterializeOptions,
    ) -> Result<Arena> {
        Self::check_kind(kind)?;
        let source = warehouse::select(id, warehouses, |uri| locate(uri, id))?;
        debug!(source = %source.display(), %id, "copying dir ware");

        fill_arena(&self.workspace, |dest| {
            let copy = CopyOptions {
                progress: opts.progress.as_ref(),
                ..CopyOptions::new(&opts.cancel)
            };
            let mut bucket = copy_tree(&source, dest, &copy)?;
            let actual = verify(id, bucket.hash()?, opts.accept_hash_mismatch)?;
            apply_filters(dest, bucket.tree()?.records(), &opts.filters)?;
            Ok(actual)
        })
    }

    fn scan(
        &self,
        kind: &TransmatKind,
        path: &Path,
        warehouses: &[SiloUri],
        opts: &ScanOptions,
    ) -> Result<CommitId> {
        Self::check_kind(kind)?;
        let bases = warehouses
            .iter()
            .map(local_base)
            .collect::<Result<Vec<_>>>()?;

        if bases.is_empty() {
            return scan_tree(path, &opts.filters, &opts.cancel, opts.progress.as_ref())?.hash();
        }

        let copy = CopyOptions {
            filters: opts.filters,
            progress: opts.progress.as_ref(),
            ..CopyOptions::new(&opts.cancel)
        };

        // stage a copy beside every destination first, commit only once all
        // copies agree on the hash
        let mut staged: Vec<PathBuf> = Vec::with_capacity(bases.len());
        let mut id: Option<CommitId> = None;
        let result = (|| {
            for base in &bases {
                let tmp = staging_path(base);
                staged.push(tmp.clone());
                let hash = copy_tree(path, &tmp, &copy)?.hash()?;
                match &id {
                    Some(first) if *first != hash => {
                        return Err(Error::corrupt(format!(
                            "{} changed while it was being scanned",
                            path.display()
                        )))
                    }
                    Some(_) => {}
                    None => id = Some(hash),
                }
            }
            Ok(())
        })();

        let id = match (result, id) {
            (Ok(()), Some(id)) => id,
            (Err(e), _) => {
                discard(&staged);
                return Err(e);
            }
            (Ok(()), None) => return Err(Error::Unknown("scan produced no hash".to_string())),
        };

        for (i, (uri, base)) in warehouses.iter().zip(&bases).enumerate() {
            let dest = if uri.is_content_addressed() {
                base.join(id.as_str())
            } else {
                base.clone()
            };
            if let Err(e) = commit_dir(&staged[i], &dest, uri.is_content_addressed()) {
                discard(&staged[i..]);
                return Err(e);
            }
            debug!(warehouse = %uri, %id, "committed dir ware");
        }
        Ok(id)
    }
}

fn staging_path(base: &Path) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{}.tmp.{}", name, token()))
}

fn discard(staged: &[PathBuf]) {
    for tmp in staged {
        if let Err(e) = remove_tree(tmp) {
            warn!(path = %tmp.display(), error = %e, "failed to remove staged copy");
        }
    }
}

/// rename a staged copy into place
///
/// in a content-addressed warehouse an existing ware with the same id is
/// identical, so the staged copy is dropped. a single-ware location is
/// replaced.
fn commit_dir(tmp: &Path, dest: &Path, content_addressed: bool) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    if !content_addressed && dest.exists() {
        remove_tree(dest)?;
    }
    match fs::rename(tmp, dest) {
        Ok(()) => Ok(()),
        Err(e) if content_addressed && is_collision(&e) => {
            debug!(path = %dest.display(), "ware already stored");
            remove_tree(tmp)
        }
        Err(e) => {
            let _ = remove_tree(tmp);
            Err(Error::Io {
                path: dest.to_path_buf(),
                source: e,
            })
        }
    }
}

/// rename failed because the destination already exists
pub(crate) fn is_collision(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::AlreadyExists
        || e.raw_os_error() == Some(nix::libc::ENOTEMPTY)
        || e.raw_os_error() == Some(nix::libc::EEXIST)
}
