use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

use crate::bucket::Bucket;
use crate::error::{Error, IoResultExt, Result};
use crate::filter::Filters;
use crate::fs::read::read_metadata;
use crate::hash::HashingReader;
use crate::progress::{CancelToken, ProgressSink};
use crate::types::{Metadata, TypeFlag};

/// walk `root` in pre-order, calling `visit` with each node's absolute path
/// and its metadata
///
/// symlinks are never followed and siblings are visited in file name order.
/// nodes that cannot be part of a ware (sockets) are skipped.
pub fn walk_tree<F>(root: &Path, cancel: &CancelToken, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, Metadata) -> Result<()>,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        cancel.check()?;

        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            Error::Io {
                path,
                source: e.into(),
            }
        })?;

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::Unknown(format!("walk escaped root: {}", entry.path().display())))?;
        let rel = rel.to_str().ok_or_else(|| Error::Io {
            path: entry.path().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 path"),
        })?;

        let Some(meta) = read_metadata(entry.path(), rel)? else {
            continue;
        };
        visit(entry.path(), meta)?;
    }
    Ok(())
}

/// hash a tree in place without copying it
///
/// `filters` are applied to each node before it is recorded; the tree on
/// disk is never modified.
pub fn scan_tree(
    root: &Path,
    filters: &Filters,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<Bucket> {
    let mut bucket = Bucket::new();
    walk_tree(root, cancel, |path, mut meta| {
        filters.apply(&mut meta);
        let hash = if meta.typeflag == TypeFlag::Regular {
            let file = File::open(path).with_path(path)?;
            let mut reader = HashingReader::new(file);
            io::copy(&mut reader, &mut io::sink()).with_path(path)?;
            progress.entry(&meta.name, reader.bytes_read());
            Some(reader.finalize())
        } else {
            progress.entry(&meta.name, 0);
            None
        };
        bucket.record(meta, hash);
        Ok(())
    })?;
    Ok(bucket)
}
