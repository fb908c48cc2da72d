use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::bucket::{Bucket, Record};
use crate::error::{IoResultExt, Result};
use crate::filter::Filters;
use crate::fs::walk::walk_tree;
use crate::fs::write::{apply_metadata, create_file, create_node, create_parents};
use crate::hash::HashingReader;
use crate::progress::{CancelToken, NoProgress, ProgressSink};
use crate::types::{Metadata, TypeFlag};

/// options for [`copy_tree`]
pub struct CopyOptions<'a> {
    /// rewrite attributes before they are recorded and written
    pub filters: Filters,
    pub cancel: &'a CancelToken,
    pub progress: &'a dyn ProgressSink,
}

impl<'a> CopyOptions<'a> {
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self {
            filters: Filters::keep_all(),
            cancel,
            progress: &NoProgress,
        }
    }
}

/// recursively copy `src` to `dst` preserving metadata, hashing as it goes
///
/// returns a bucket describing the tree as written (after filters).
/// directory attributes are applied last, deepest first, so their mtimes
/// survive the creation of their children and read-only directories can
/// still be populated.
pub fn copy_tree(src: &Path, dst: &Path, opts: &CopyOptions<'_>) -> Result<Bucket> {
    let mut bucket = Bucket::new();
    let mut dirs: Vec<(PathBuf, Metadata)> = Vec::new();

    walk_tree(src, opts.cancel, |path, mut meta| {
        opts.filters.apply(&mut meta);
        let rel = Path::new(meta.relative_path());
        let target = dst.join(rel);
        create_parents(dst, rel)?;

        match meta.typeflag {
            TypeFlag::Regular => {
                let input = File::open(path).with_path(path)?;
                let mut reader = HashingReader::new(input);
                let mut output = create_file(&target)?;
                io::copy(&mut reader, &mut output).with_path(&target)?;
                drop(output);

                let bytes = reader.bytes_read();
                apply_metadata(&target, &meta)?;
                opts.progress.entry(&meta.name, bytes);
                bucket.record(meta, Some(reader.finalize()));
            }
            TypeFlag::Directory => {
                create_node(&target, &meta)?;
                opts.progress.entry(&meta.name, 0);
                dirs.push((target, meta.clone()));
                bucket.record(meta, None);
            }
            _ => {
                if create_node(&target, &meta)? {
                    apply_metadata(&target, &meta)?;
                }
                opts.progress.entry(&meta.name, 0);
                bucket.record(meta, None);
            }
        }
        Ok(())
    })?;

    for (path, meta) in dirs.iter().rev() {
        apply_metadata(path, meta)?;
    }

    Ok(bucket)
}

/// re-apply recorded attributes under `filters` to a tree already on disk
///
/// records must be in pre-order; they are visited in reverse so directory
/// mtimes are set after their contents. nodes missing on disk (device nodes
/// skipped for lack of privileges) are ignored.
pub fn apply_filters(root: &Path, records: &[Record], filters: &Filters) -> Result<()> {
    if filters.is_keep_all() {
        return Ok(());
    }
    for record in records.iter().rev() {
        let mut meta = record.metadata.clone();
        filters.apply(&mut meta);
        let path = root.join(meta.relative_path());
        if path.symlink_metadata().is_err() {
            continue;
        }
        apply_metadata(&path, &meta)?;
    }
    Ok(())
}
