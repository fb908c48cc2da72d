//! canonical encoding of one node's metadata
//!
//! the encoding is a CBOR map with a definite length computed up front from
//! which optional fields are present. keys are short fixed tokens written in
//! a fixed order (never re-sorted):
//!
//! | key   | value                                   | present        |
//! |-------|-----------------------------------------|----------------|
//! | `n`   | basename (`.` for the root)             | always         |
//! | `t`   | tar typeflag byte                       | always         |
//! | `m`   | mode & 0o7777                           | always         |
//! | `u`   | uid                                     | always         |
//! | `g`   | gid                                     | always         |
//! | `tm`  | mtime, unix seconds                     | always         |
//! | `tmn` | mtime, nanoseconds                      | always         |
//! | `l`   | link target                             | if non-empty   |
//! | `dM`  | device major                            | block/char dev |
//! | `dm`  | device minor                            | block/char dev |
//! | `x`   | map of xattr name to bytes, keys sorted | if any xattrs  |
//!
//! atime and ctime are never part of the encoding.

use std::io::Write;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::Result;
use crate::types::{Metadata, Xattr, MODE_MASK};

/// fields that are always present
const BASE_FIELDS: usize = 7;

/// encode one node's metadata into a fresh buffer
pub fn encode(meta: &Metadata) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    encode_into(meta, &mut buf)?;
    Ok(buf)
}

/// encode one node's metadata into a writer
pub fn encode_into<W: Write>(meta: &Metadata, writer: W) -> Result<()> {
    ciborium::into_writer(&Canonical(meta), writer)?;
    Ok(())
}

struct Canonical<'a>(&'a Metadata);

impl Serialize for Canonical<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let m = self.0;
        let has_link = !m.linkname.is_empty();
        let is_device = m.typeflag.is_device();
        let has_xattrs = !m.xattrs.is_empty();

        let mut fields = BASE_FIELDS;
        if has_link {
            fields += 1;
        }
        if is_device {
            fields += 2;
        }
        if has_xattrs {
            fields += 1;
        }

        let mut map = serializer.serialize_map(Some(fields))?;
        map.serialize_entry("n", m.basename())?;
        map.serialize_entry("t", &m.typeflag.as_byte())?;
        map.serialize_entry("m", &(m.mode & MODE_MASK))?;
        map.serialize_entry("u", &m.uid)?;
        map.serialize_entry("g", &m.gid)?;
        map.serialize_entry("tm", &m.mtime)?;
        map.serialize_entry("tmn", &m.mtime_nanos)?;
        if has_link {
            map.serialize_entry("l", &m.linkname)?;
        }
        if is_device {
            map.serialize_entry("dM", &m.devmajor)?;
            map.serialize_entry("dm", &m.devminor)?;
        }
        if has_xattrs {
            map.serialize_entry("x", &XattrMap(&m.xattrs))?;
        }
        map.end()
    }
}

struct XattrMap<'a>(&'a [Xattr]);

impl Serialize for XattrMap<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut sorted: Vec<&Xattr> = self.0.iter().collect();
        sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for xattr in sorted {
            map.serialize_entry(&xattr.name, &Bytes(&xattr.value))?;
        }
        map.end()
    }
}

struct Bytes<'a>(&'a [u8]);

impl Serialize for Bytes<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeFlag;

    #[test]
    fn test_root_dir_golden_bytes() {
        let root = Metadata::placeholder_dir(".");
        let bytes = encode(&root).unwrap();
        let expected: Vec<u8> = vec![
            0xa7, // map, 7 entries
            0x61, b'n', 0x61, b'.', //
            0x61, b't', 0x18, b'5', //
            0x61, b'm', 0x19, 0x01, 0xed, // 0o755
            0x61, b'u', 0x00, //
            0x61, b'g', 0x00, //
            0x62, b't', b'm', 0x00, //
            0x63, b't', b'm', b'n', 0x00,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_field_count_tracks_optional_fields() {
        let mut link = Metadata::new("link", TypeFlag::Symlink);
        link.linkname = "target".to_string();
        assert_eq!(encode(&link).unwrap()[0], 0xa8);

        let mut dev = Metadata::new("dev/null", TypeFlag::CharDevice);
        dev.devmajor = 1;
        dev.devminor = 3;
        assert_eq!(encode(&dev).unwrap()[0], 0xa9);

        let mut file = Metadata::new("file", TypeFlag::Regular);
        file.xattrs = vec![Xattr::new("user.k", b"v".to_vec())];
        assert_eq!(encode(&file).unwrap()[0], 0xa8);
    }

    #[test]
    fn test_device_numbers_ignored_for_non_devices() {
        let plain = Metadata::new("file", TypeFlag::Regular);
        let mut with_dev = plain.clone();
        with_dev.devmajor = 8;
        with_dev.devminor = 1;
        assert_eq!(encode(&plain).unwrap(), encode(&with_dev).unwrap());
    }

    #[test]
    fn test_only_basename_is_encoded() {
        let a = Metadata::new("a/x", TypeFlag::Regular);
        let b = Metadata::new("b/c/x", TypeFlag::Regular);
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn test_mode_masked_to_low_bits() {
        let mut a = Metadata::new("f", TypeFlag::Regular);
        let mut b = a.clone();
        a.mode = 0o4755;
        b.mode = 0o104755;
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn test_xattr_order_independent() {
        let mut a = Metadata::new("f", TypeFlag::Regular);
        let mut b = a.clone();
        a.xattrs = vec![Xattr::new("user.a", vec![1]), Xattr::new("user.b", vec![2])];
        b.xattrs = vec![Xattr::new("user.b", vec![2]), Xattr::new("user.a", vec![1])];
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn test_sensitive_to_each_field() {
        let base = Metadata::new("f", TypeFlag::Regular);
        let baseline = encode(&base).unwrap();

        let variants: Vec<Box<dyn Fn(&mut Metadata)>> = vec![
            Box::new(|m| m.mode = 0o600),
            Box::new(|m| m.uid = 1000),
            Box::new(|m| m.gid = 1000),
            Box::new(|m| m.mtime = 1),
            Box::new(|m| m.mtime_nanos = 1),
            Box::new(|m| m.name = "./g".to_string()),
            Box::new(|m| m.typeflag = TypeFlag::Fifo),
        ];
        for change in variants {
            let mut m = base.clone();
            change(&mut m);
            assert_ne!(encode(&m).unwrap(), baseline, "{:?}", m);
        }
    }
}
