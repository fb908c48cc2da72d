//! warehouses on the local filesystem

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::CommitId;

use super::{SiloUri, WareWriter, Warehouse};

/// `file://` and `file+ca://` warehouses
pub struct FileWarehouse {
    uri: SiloUri,
    path: PathBuf,
}

impl FileWarehouse {
    pub fn new(uri: SiloUri) -> Result<Self> {
        let path = uri.local_path().ok_or_else(|| Error::UnsupportedTransport {
            kind: "file".to_string(),
            uri: uri.to_string(),
        })?;
        Ok(Self { uri, path })
    }

    /// directory that must exist for the warehouse to be usable
    ///
    /// a content-addressed warehouse is the directory itself; a single-ware
    /// warehouse only needs its parent.
    fn anchor(&self) -> &Path {
        if self.uri.is_content_addressed() {
            &self.path
        } else {
            match self.path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            }
        }
    }

    fn ware_path(&self, id: &CommitId) -> PathBuf {
        if self.uri.is_content_addressed() {
            self.path.join(id.as_str())
        } else {
            self.path.clone()
        }
    }
}

impl Warehouse for FileWarehouse {
    fn uri(&self) -> &SiloUri {
        &self.uri
    }

    fn ping(&self) -> Result<()> {
        let anchor = self.anchor();
        if anchor.is_dir() {
            Ok(())
        } else {
            Err(Error::WarehouseUnavailable {
                uri: self.uri.to_string(),
                reason: format!("{} is not a directory", anchor.display()),
            })
        }
    }

    fn open_reader(&self, id: &CommitId) -> Result<Box<dyn Read + Send>> {
        let path = self.ware_path(id);
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::WareNotFound {
                uri: self.uri.to_string(),
                id: id.clone(),
            }),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn open_writer(&self) -> Result<Box<dyn WareWriter>> {
        let dir = self.anchor().to_path_buf();
        let tmp = dir.join(format!(".tmp.{}", uuid::Uuid::new_v4()));
        let file = File::create(&tmp).with_path(&tmp)?;
        Ok(Box::new(FileWareWriter {
            warehouse: self.uri.clone(),
            dest: self.path.clone(),
            tmp: Some(tmp),
            writer: BufWriter::new(file),
        }))
    }
}

/// temp file beside the destination, renamed into place on commit
struct FileWareWriter {
    warehouse: SiloUri,
    dest: PathBuf,
    tmp: Option<PathBuf>,
    writer: BufWriter<File>,
}

impl Write for FileWareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WareWriter for FileWareWriter {
    fn commit(mut self: Box<Self>, id: &CommitId) -> Result<()> {
        let Some(tmp) = self.tmp.take() else {
            return Ok(());
        };
        self.writer.flush().with_path(&tmp)?;
        self.writer.get_ref().sync_all().with_path(&tmp)?;

        let dest = if self.warehouse.is_content_addressed() {
            self.dest.join(id.as_str())
        } else {
            self.dest.clone()
        };
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io {
                path: dest,
                source: e,
            });
        }
        debug!(warehouse = %self.warehouse, %id, "committed ware");
        Ok(())
    }
}

impl Drop for FileWareWriter {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = fs::remove_file(&tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn id(s: &str) -> CommitId {
        CommitId::parse(s).unwrap()
    }

    fn warehouse(uri: &str) -> FileWarehouse {
        FileWarehouse::new(SiloUri::parse(uri).unwrap()).unwrap()
    }

    #[test]
    fn test_ca_write_commit_read() {
        let dir = tempdir().unwrap();
        let wh = warehouse(&format!("file+ca://{}", dir.path().display()));
        wh.ping().unwrap();

        let mut writer = wh.open_writer().unwrap();
        writer.write_all(b"payload").unwrap();
        writer.commit(&id("abc")).unwrap();

        assert!(dir.path().join("abc").is_file());
        let mut content = String::new();
        wh.open_reader(&id("abc"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "payload");

        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_single_ware_location() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ware.tgz");
        let wh = warehouse(&format!("file://{}", path.display()));

        let mut writer = wh.open_writer().unwrap();
        writer.write_all(b"x").unwrap();
        writer.commit(&id("ignored")).unwrap();

        assert!(path.is_file());
        assert!(wh.open_reader(&id("whatever")).is_ok());
    }

    #[test]
    fn test_uncommitted_writer_leaves_nothing() {
        let dir = tempdir().unwrap();
        let wh = warehouse(&format!("file+ca://{}", dir.path().display()));

        let mut writer = wh.open_writer().unwrap();
        writer.write_all(b"partial").unwrap();
        drop(writer);

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_ware_is_not_found() {
        let dir = tempdir().unwrap();
        let wh = warehouse(&format!("file+ca://{}", dir.path().display()));
        let err = wh.open_reader(&id("nope")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WareNotFound);
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = tempdir().unwrap();
        let wh = warehouse(&format!("file+ca://{}/absent", dir.path().display()));
        assert_eq!(wh.ping().unwrap_err().kind(), ErrorKind::WarehouseUnavailable);

        let wh = warehouse(&format!("file://{}/absent/ware.tgz", dir.path().display()));
        assert_eq!(wh.ping().unwrap_err().kind(), ErrorKind::WarehouseUnavailable);
    }
}
