use serde::{Deserialize, Serialize};

/// extended attribute (name + value)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

impl Xattr {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// node type, using the tar typeflag byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    Regular,
    /// only ever appears in archives; never recorded in a bucket
    Hardlink,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
}

impl TypeFlag {
    /// the tar typeflag byte
    pub fn as_byte(self) -> u8 {
        match self {
            TypeFlag::Regular => b'0',
            TypeFlag::Hardlink => b'1',
            TypeFlag::Symlink => b'2',
            TypeFlag::CharDevice => b'3',
            TypeFlag::BlockDevice => b'4',
            TypeFlag::Directory => b'5',
            TypeFlag::Fifo => b'6',
        }
    }

    /// parse a tar typeflag byte; NUL is the old-style regular file marker
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'0' | b'\0' | b'7' => Some(TypeFlag::Regular),
            b'1' => Some(TypeFlag::Hardlink),
            b'2' => Some(TypeFlag::Symlink),
            b'3' => Some(TypeFlag::CharDevice),
            b'4' => Some(TypeFlag::BlockDevice),
            b'5' => Some(TypeFlag::Directory),
            b'6' => Some(TypeFlag::Fifo),
            _ => None,
        }
    }

    pub fn is_device(self) -> bool {
        matches!(self, TypeFlag::CharDevice | TypeFlag::BlockDevice)
    }

    /// get the type name for error messages
    pub fn type_name(self) -> &'static str {
        match self {
            TypeFlag::Regular => "regular",
            TypeFlag::Hardlink => "hardlink",
            TypeFlag::Symlink => "symlink",
            TypeFlag::CharDevice => "char_device",
            TypeFlag::BlockDevice => "block_device",
            TypeFlag::Directory => "directory",
            TypeFlag::Fifo => "fifo",
        }
    }
}

/// attributes of one filesystem node
///
/// `name` is the full normalized path relative to the tree root: it always
/// starts with `./`, and directories end with `/`. the root itself is `./`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub typeflag: TypeFlag,
    /// permission bits plus setuid/setgid/sticky only
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// seconds since the unix epoch
    pub mtime: i64,
    /// sub-second part of mtime, 0..1_000_000_000
    pub mtime_nanos: u32,
    /// symlink target (or hardlink target inside archives)
    pub linkname: String,
    pub devmajor: u32,
    pub devminor: u32,
    pub xattrs: Vec<Xattr>,
}

/// mask of the mode bits that are part of a node's identity
pub const MODE_MASK: u32 = 0o7777;

impl Metadata {
    /// new node with placeholder attributes (root-owned, epoch mtime)
    pub fn new(name: &str, typeflag: TypeFlag) -> Self {
        let mode = match typeflag {
            TypeFlag::Directory => 0o755,
            TypeFlag::Symlink => 0o777,
            _ => 0o644,
        };
        Self {
            name: normalize_name(name, typeflag == TypeFlag::Directory),
            typeflag,
            mode,
            uid: 0,
            gid: 0,
            mtime: 0,
            mtime_nanos: 0,
            linkname: String::new(),
            devmajor: 0,
            devminor: 0,
            xattrs: vec![],
        }
    }

    /// placeholder for a directory the tree never described
    pub fn placeholder_dir(name: &str) -> Self {
        Self::new(name, TypeFlag::Directory)
    }

    pub fn is_dir(&self) -> bool {
        self.typeflag == TypeFlag::Directory
    }

    pub fn is_root(&self) -> bool {
        self.name == "./"
    }

    /// last path component; the root is "."
    pub fn basename(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(i) => &trimmed[i + 1..],
            None => trimmed,
        }
    }

    /// path relative to the tree root, without the `./` prefix or trailing slash
    ///
    /// empty for the root.
    pub fn relative_path(&self) -> &str {
        self.name
            .strip_prefix("./")
            .unwrap_or(&self.name)
            .trim_end_matches('/')
    }

    /// normalized name of the parent directory, or None for the root
    pub fn parent_name(&self) -> Option<String> {
        parent_name(&self.name)
    }

    /// clamp fields to their canonical ranges
    pub fn canonicalize(&mut self) {
        self.mode &= MODE_MASK;
        if self.mtime_nanos >= 1_000_000_000 {
            self.mtime += (self.mtime_nanos / 1_000_000_000) as i64;
            self.mtime_nanos %= 1_000_000_000;
        }
        if !self.typeflag.is_device() {
            self.devmajor = 0;
            self.devminor = 0;
        }
        self.xattrs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    }
}

/// normalize a relative path into `./a/b` form, with a trailing slash for dirs
///
/// leading `/`, `./` and repeated or trailing slashes are stripped before
/// the prefix is applied. the empty path and `.` both denote the root.
pub fn normalize_name(raw: &str, is_dir: bool) -> String {
    let parts: Vec<&str> = raw
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        return "./".to_string();
    }
    let mut name = format!("./{}", parts.join("/"));
    if is_dir {
        name.push('/');
    }
    name
}

/// normalized name of the directory containing `name`
pub fn parent_name(name: &str) -> Option<String> {
    if name == "./" {
        return None;
    }
    let trimmed = name.trim_end_matches('/');
    trimmed.rfind('/').map(|i| trimmed[..=i].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xattr_creation() {
        let x = Xattr::new("security.selinux", vec![1, 2, 3]);
        assert_eq!(x.name, "security.selinux");
        assert_eq!(x.value, vec![1, 2, 3]);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("", true), "./");
        assert_eq!(normalize_name(".", true), "./");
        assert_eq!(normalize_name("./", true), "./");
        assert_eq!(normalize_name("a/b", false), "./a/b");
        assert_eq!(normalize_name("/a//b/", true), "./a/b/");
        assert_eq!(normalize_name("./a/./b", false), "./a/b");
    }

    #[test]
    fn test_parent_name() {
        assert_eq!(parent_name("./"), None);
        assert_eq!(parent_name("./a"), Some("./".to_string()));
        assert_eq!(parent_name("./a/"), Some("./".to_string()));
        assert_eq!(parent_name("./a/b/"), Some("./a/".to_string()));
        assert_eq!(parent_name("./a/b/c"), Some("./a/b/".to_string()));
    }

    #[test]
    fn test_basename_and_relative_path() {
        let root = Metadata::placeholder_dir(".");
        assert_eq!(root.basename(), ".");
        assert_eq!(root.relative_path(), "");
        assert!(root.is_root());

        let dir = Metadata::new("usr/bin", TypeFlag::Directory);
        assert_eq!(dir.name, "./usr/bin/");
        assert_eq!(dir.basename(), "bin");
        assert_eq!(dir.relative_path(), "usr/bin");

        let file = Metadata::new("usr/bin/sh", TypeFlag::Regular);
        assert_eq!(file.basename(), "sh");
        assert_eq!(file.parent_name().unwrap(), "./usr/bin/");
    }

    #[test]
    fn test_canonicalize() {
        let mut m = Metadata::new("dev/null", TypeFlag::Regular);
        m.mode = 0o100644;
        m.devmajor = 1;
        m.devminor = 3;
        m.mtime_nanos = 1_500_000_000;
        m.xattrs = vec![Xattr::new("user.b", vec![2]), Xattr::new("user.a", vec![1])];
        m.canonicalize();
        assert_eq!(m.mode, 0o644);
        assert_eq!((m.devmajor, m.devminor), (0, 0));
        assert_eq!((m.mtime, m.mtime_nanos), (1, 500_000_000));
        assert_eq!(m.xattrs[0].name, "user.a");
    }

    #[test]
    fn test_typeflag_bytes() {
        for flag in [
            TypeFlag::Regular,
            TypeFlag::Hardlink,
            TypeFlag::Symlink,
            TypeFlag::CharDevice,
            TypeFlag::BlockDevice,
            TypeFlag::Directory,
            TypeFlag::Fifo,
        ] {
            assert_eq!(TypeFlag::from_byte(flag.as_byte()), Some(flag));
        }
        assert_eq!(TypeFlag::from_byte(0), Some(TypeFlag::Regular));
        assert_eq!(TypeFlag::from_byte(b'x'), None);
    }
}
