//! attribute filters
//!
//! a filter either keeps an attribute as found or flattens it to a fixed
//! value. filters change the canonical encoding, so scan applies them before
//! anything is hashed.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::Metadata;

/// uid used when flattening without an explicit value
pub const FLATTEN_UID: u32 = 1000;
/// gid used when flattening without an explicit value
pub const FLATTEN_GID: u32 = 1000;
/// 2010-01-01T00:00:00Z, used when flattening mtime without an explicit value
pub const FLATTEN_MTIME: i64 = 1_262_304_000;

/// keep-or-flatten rule for one attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Filter<T> {
    #[default]
    Keep,
    Flatten(T),
}

impl<T: Copy> Filter<T> {
    fn apply(&self, value: &mut T) {
        if let Filter::Flatten(v) = self {
            *value = *v;
        }
    }
}

/// the full filter set for a scan or materialize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filters {
    pub uid: Filter<u32>,
    pub gid: Filter<u32>,
    pub mtime: Filter<i64>,
}

impl Filters {
    /// keep every attribute as found
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// flatten uid, gid and mtime to the default values
    pub fn flatten_all() -> Self {
        Self {
            uid: Filter::Flatten(FLATTEN_UID),
            gid: Filter::Flatten(FLATTEN_GID),
            mtime: Filter::Flatten(FLATTEN_MTIME),
        }
    }

    pub fn is_keep_all(&self) -> bool {
        *self == Self::keep_all()
    }

    /// rewrite the filtered attributes in place
    pub fn apply(&self, meta: &mut Metadata) {
        self.uid.apply(&mut meta.uid);
        self.gid.apply(&mut meta.gid);
        if let Filter::Flatten(t) = self.mtime {
            meta.mtime = t;
            meta.mtime_nanos = 0;
        }
    }

    /// parse a list of filter specs, later specs overriding earlier ones
    ///
    /// each spec is `<attr> [keep | <value>]` where attr is `uid`, `gid` or
    /// `mtime`. mtime values are unix seconds, optionally prefixed with `@`.
    /// an attribute with no argument is flattened to its default value.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let mut filters = Self::default();
        for spec in specs {
            filters.parse_one(spec.as_ref())?;
        }
        Ok(filters)
    }

    fn parse_one(&mut self, spec: &str) -> Result<()> {
        let invalid = || Error::InvalidFilter(spec.to_string());
        let mut parts = spec.split_whitespace();
        let attr = parts.next().ok_or_else(invalid)?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        match attr {
            "uid" => self.uid = parse_rule(arg, FLATTEN_UID).ok_or_else(invalid)?,
            "gid" => self.gid = parse_rule(arg, FLATTEN_GID).ok_or_else(invalid)?,
            "mtime" => {
                let arg = arg.map(|a| a.strip_prefix('@').unwrap_or(a));
                self.mtime = parse_rule(arg, FLATTEN_MTIME).ok_or_else(invalid)?
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

fn parse_rule<T: FromStr + Copy>(arg: Option<&str>, default: T) -> Option<Filter<T>> {
    match arg {
        None => Some(Filter::Flatten(default)),
        Some("keep") => Some(Filter::Keep),
        Some(v) => v.parse().ok().map(Filter::Flatten),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::TypeFlag;

    fn sample() -> Metadata {
        let mut m = Metadata::new("f", TypeFlag::Regular);
        m.uid = 42;
        m.gid = 43;
        m.mtime = 1_700_000_000;
        m.mtime_nanos = 123;
        m
    }

    #[test]
    fn test_keep_all_is_identity() {
        let mut m = sample();
        Filters::keep_all().apply(&mut m);
        assert_eq!(m, sample());
    }

    #[test]
    fn test_flatten_all() {
        let mut m = sample();
        Filters::flatten_all().apply(&mut m);
        assert_eq!(m.uid, FLATTEN_UID);
        assert_eq!(m.gid, FLATTEN_GID);
        assert_eq!(m.mtime, FLATTEN_MTIME);
        assert_eq!(m.mtime_nanos, 0);
    }

    #[test]
    fn test_parse_specs() {
        let f = Filters::parse(&["uid 0", "gid keep", "mtime @1"]).unwrap();
        assert_eq!(f.uid, Filter::Flatten(0));
        assert_eq!(f.gid, Filter::Keep);
        assert_eq!(f.mtime, Filter::Flatten(1));

        let f = Filters::parse(&["uid", "mtime"]).unwrap();
        assert_eq!(f.uid, Filter::Flatten(FLATTEN_UID));
        assert_eq!(f.mtime, Filter::Flatten(FLATTEN_MTIME));

        // later specs win
        let f = Filters::parse(&["uid 5", "uid keep"]).unwrap();
        assert_eq!(f.uid, Filter::Keep);
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "size 10", "uid abc", "uid 1 2", "mtime @x"] {
            let err = Filters::parse(&[bad]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{bad:?}");
        }
    }
}
