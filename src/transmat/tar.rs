//! gzip'd tar wares
//!
//! entries are written root first in pre-order. sub-second and pre-epoch
//! mtimes travel in a PAX `mtime` record and xattrs in `SCHILY.xattr.*`
//! records, so a materialized tarball scans back to the same id.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ::tar::{Archive, Builder, EntryType, Header};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::bucket::Bucket;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{
    apply_filters, apply_metadata, create_file, create_hardlink, create_node, create_parents,
    walk_tree,
};
use crate::hash::{CommitId, ContentHash, HashingReader};
use crate::types::{normalize_name, Metadata, TypeFlag, Xattr, MODE_MASK};
use crate::warehouse::{self, SiloUri, WareWriter};
use crate::workspace::Workspace;

use super::{fill_arena, verify, Arena, MaterializeOptions, ScanOptions, Transmat, TransmatKind};

const PAX_MTIME: &str = "mtime";
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// the reference transmat: gzip'd POSIX tar streams
pub struct TarTransmat {
    workspace: Workspace,
}

impl TarTransmat {
    pub const KIND: &'static str = "tar";

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

impl Transmat for TarTransmat {
    fn materialize(
        &self,
        kind: &TransmatKind,
        id: &CommitId,
        warehouses: &[SiloUri],
        opts: &MaterializeOptions,
    ) -> Result<Arena> {
        Self::check_kind(kind)?;
        let (source, reader) = warehouse::pick_reader(id, warehouses)?;
        debug!(warehouse = %source, %id, "unpacking tar ware");

        fill_arena(&self.workspace, |dest| {
            let mut bucket = unpack(reader, dest, opts)?;
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
        let writers = warehouses
            .iter()
            .map(|uri| warehouse::open(uri)?.open_writer())
            .collect::<Result<Vec<_>>>()?;

        let encoder = GzEncoder::new(Fanout { writers }, Compression::default());
        let mut builder = Builder::new(encoder);
        let mut bucket = Bucket::new();

        walk_tree(path, &opts.cancel, |abs, mut meta| {
            opts.filters.apply(&mut meta);
            let (hash, bytes) = append_entry(&mut builder, abs, &meta)?;
            opts.progress.entry(&meta.name, bytes);
            bucket.record(meta, hash);
            Ok(())
        })?;

        let encoder = builder.into_inner().with_path(path)?;
        let fanout = encoder.finish().with_path(path)?;
        let id = bucket.hash()?;

        for writer in fanout.writers {
            writer.commit(&id)?;
        }
        Ok(id)
    }
}

/// copies every write to all warehouse writers
struct Fanout {
    writers: Vec<Box<dyn WareWriter>>,
}

impl Write for Fanout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

fn entry_type(flag: TypeFlag) -> EntryType {
    match flag {
        TypeFlag::Regular => EntryType::Regular,
        TypeFlag::Hardlink => EntryType::Link,
        TypeFlag::Symlink => EntryType::Symlink,
        TypeFlag::CharDevice => EntryType::Char,
        TypeFlag::BlockDevice => EntryType::Block,
        TypeFlag::Directory => EntryType::Directory,
        TypeFlag::Fifo => EntryType::Fifo,
    }
}

/// write one node; returns the content hash and length for regular files
fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    abs: &Path,
    meta: &Metadata,
) -> Result<(Option<ContentHash>, u64)> {
    let mut pax: Vec<(String, Vec<u8>)> = Vec::new();
    if meta.mtime_nanos != 0 || meta.mtime < 0 {
        pax.push((
            PAX_MTIME.to_string(),
            format_pax_mtime(meta.mtime, meta.mtime_nanos).into_bytes(),
        ));
    }
    for x in &meta.xattrs {
        pax.push((format!("{}{}", PAX_XATTR_PREFIX, x.name), x.value.clone()));
    }
    if !pax.is_empty() {
        builder
            .append_pax_extensions(pax.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
            .with_path(abs)?;
    }

    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type(meta.typeflag));
    header.set_mode(meta.mode & MODE_MASK);
    header.set_uid(meta.uid as u64);
    header.set_gid(meta.gid as u64);
    header.set_mtime(meta.mtime.max(0) as u64);
    header.set_size(0);
    if meta.typeflag.is_device() {
        header.set_device_major(meta.devmajor).with_path(abs)?;
        header.set_device_minor(meta.devminor).with_path(abs)?;
    }

    let archive_path = match meta.relative_path() {
        "" => ".",
        rel => rel,
    };

    match meta.typeflag {
        TypeFlag::Regular => {
            let file = File::open(abs).with_path(abs)?;
            let len = file.metadata().with_path(abs)?.len();
            header.set_size(len);
            let mut reader = HashingReader::new(file);
            builder
                .append_data(&mut header, archive_path, &mut reader)
                .with_path(abs)?;
            Ok((Some(reader.finalize()), len))
        }
        TypeFlag::Symlink => {
            builder
                .append_link(&mut header, archive_path, &meta.linkname)
                .with_path(abs)?;
            Ok((None, 0))
        }
        _ => {
            builder
                .append_data(&mut header, archive_path, io::empty())
                .with_path(abs)?;
            Ok((None, 0))
        }
    }
}

/// regular files already unpacked, for resolving hardlinks
struct Unpacked {
    path: PathBuf,
    metadata: Metadata,
    hash: ContentHash,
}

/// unpack a gzip'd tar stream into `dest`, recording every node
///
/// errors reading the archive are reported as corrupt ware; errors writing
/// to `dest` as io errors.
fn unpack<R: Read>(reader: R, dest: &Path, opts: &MaterializeOptions) -> Result<Bucket> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut bucket = Bucket::new();
    let mut files: HashMap<String, Unpacked> = HashMap::new();
    let mut dirs: Vec<(PathBuf, Metadata)> = Vec::new();
    let mut seen_root = false;

    let entries = archive
        .entries()
        .map_err(|e| Error::corrupt(format!("not a tar stream: {}", e)))?;

    for entry in entries {
        opts.cancel.check()?;
        let mut entry = entry.map_err(|e| Error::corrupt(format!("bad tar entry: {}", e)))?;
        let Some(meta) = entry_metadata(&mut entry)? else {
            continue;
        };
        let rel = Path::new(meta.relative_path());
        let target = dest.join(rel);
        // a parent the archive never described is created here and
        // reported by the hash; one that is a symlink is refused
        create_parents(dest, rel)?;

        match meta.typeflag {
            TypeFlag::Regular => {
                let mut output = create_file(&target)?;
                let mut reader = HashingReader::new(&mut entry);
                copy_entry(&mut reader, &mut output, &meta.name, &target)?;
                drop(output);
                let bytes = reader.bytes_read();
                let hash = reader.finalize();

                apply_metadata(&target, &meta)?;
                opts.progress.entry(&meta.name, bytes);
                files.insert(
                    meta.name.clone(),
                    Unpacked {
                        path: target,
                        metadata: meta.clone(),
                        hash,
                    },
                );
                bucket.record(meta, Some(hash));
            }
            TypeFlag::Hardlink => {
                let link_target = normalize_name(&meta.linkname, false);
                let original = files.get(&link_target).ok_or_else(|| {
                    Error::corrupt(format!(
                        "hardlink {} points at unknown file {}",
                        meta.name, meta.linkname
                    ))
                })?;
                create_hardlink(&target, &original.path)?;

                let mut recorded = original.metadata.clone();
                recorded.name = meta.name.clone();
                opts.progress.entry(&meta.name, 0);
                bucket.record(recorded, Some(original.hash));
            }
            TypeFlag::Directory => {
                seen_root |= meta.is_root();
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
    }

    if !seen_root {
        debug!("archive has no root entry, synthesizing one");
        let root = Metadata::placeholder_dir(".");
        dirs.insert(0, (dest.to_path_buf(), root.clone()));
        bucket.record(root, None);
    }

    for (path, meta) in dirs.iter().rev() {
        apply_metadata(path, meta)?;
    }

    Ok(bucket)
}

fn copy_entry<R: Read>(
    reader: &mut R,
    output: &mut File,
    name: &str,
    target: &Path,
) -> Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::corrupt(format!("truncated content for {}: {}", name, e)))?;
        if n == 0 {
            return Ok(());
        }
        output.write_all(&buf[..n]).with_path(target)?;
    }
}

/// decode one entry's header and PAX records
///
/// returns None for entry types that have no place in a ware.
fn entry_metadata<R: Read>(entry: &mut ::tar::Entry<'_, R>) -> Result<Option<Metadata>> {
    let raw_name = String::from_utf8(entry.path_bytes().into_owned())
        .map_err(|_| Error::corrupt("entry name is not utf-8"))?;
    if raw_name.split('/').any(|part| part == "..") {
        return Err(Error::corrupt(format!("entry {} escapes the ware", raw_name)));
    }

    let header = entry.header();
    let typeflag = match header.entry_type() {
        EntryType::Regular | EntryType::Continuous => TypeFlag::Regular,
        EntryType::Link => TypeFlag::Hardlink,
        EntryType::Symlink => TypeFlag::Symlink,
        EntryType::Char => TypeFlag::CharDevice,
        EntryType::Block => TypeFlag::BlockDevice,
        EntryType::Directory => TypeFlag::Directory,
        EntryType::Fifo => TypeFlag::Fifo,
        other => {
            warn!(name = %raw_name, entry_type = ?other, "skipping unsupported tar entry");
            return Ok(None);
        }
    };

    let bad_header = |field: &str, e: io::Error| {
        Error::corrupt(format!("bad {} in header of {}: {}", field, raw_name, e))
    };
    let mode = header.mode().map_err(|e| bad_header("mode", e))?;
    let uid = header.uid().map_err(|e| bad_header("uid", e))?;
    let gid = header.gid().map_err(|e| bad_header("gid", e))?;
    let mtime = header.mtime().map_err(|e| bad_header("mtime", e))?;
    let (devmajor, devminor) = if typeflag.is_device() {
        (
            header.device_major().map_err(|e| bad_header("devmajor", e))?.unwrap_or(0),
            header.device_minor().map_err(|e| bad_header("devminor", e))?.unwrap_or(0),
        )
    } else {
        (0, 0)
    };

    let linkname = match entry.link_name_bytes() {
        Some(bytes) => String::from_utf8(bytes.into_owned())
            .map_err(|_| Error::corrupt(format!("link target of {} is not utf-8", raw_name)))?,
        None => String::new(),
    };

    let mut meta = Metadata {
        name: normalize_name(&raw_name, typeflag == TypeFlag::Directory),
        typeflag,
        mode: mode & MODE_MASK,
        uid: uid as u32,
        gid: gid as u32,
        mtime: mtime as i64,
        mtime_nanos: 0,
        linkname,
        devmajor,
        devminor,
        xattrs: Vec::new(),
    };

    if let Some(extensions) = entry
        .pax_extensions()
        .map_err(|e| Error::corrupt(format!("bad pax records for {}: {}", raw_name, e)))?
    {
        for ext in extensions {
            let ext =
                ext.map_err(|e| Error::corrupt(format!("bad pax record for {}: {}", raw_name, e)))?;
            let Ok(key) = ext.key() else { continue };
            if key == PAX_MTIME {
                let value = ext.value().map_err(|_| Error::corrupt("pax mtime is not utf-8"))?;
                let (secs, nanos) = parse_pax_mtime(value)
                    .ok_or_else(|| Error::corrupt(format!("bad pax mtime {:?}", value)))?;
                meta.mtime = secs;
                meta.mtime_nanos = nanos;
            } else if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
                meta.xattrs.push(Xattr::new(name, ext.value_bytes()));
            }
        }
    }

    Ok(Some(meta))
}

/// decimal seconds with up to nine fractional digits
fn format_pax_mtime(secs: i64, nanos: u32) -> String {
    if nanos == 0 {
        return secs.to_string();
    }
    let (sign, whole, frac) = if secs < 0 {
        // -1.25 is stored as secs -2, nanos 750_000_000
        ("-", (-(secs + 1)) as u64, 1_000_000_000 - nanos)
    } else {
        ("", secs as u64, nanos)
    };
    let digits = format!("{:09}", frac);
    format!("{}{}.{}", sign, whole, digits.trim_end_matches('0'))
}

fn parse_pax_mtime(value: &str) -> Option<(i64, u32)> {
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let whole: i64 = whole.parse().ok()?;

    let mut nanos: u32 = 0;
    if !frac.is_empty() {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // extra precision beyond nanoseconds is dropped
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
        nanos = digits.parse().ok()?;
    }

    if !negative {
        Some((whole, nanos))
    } else if nanos == 0 {
        Some((-whole, 0))
    } else {
        Some((-whole - 1, 1_000_000_000 - nanos))
    }
}
