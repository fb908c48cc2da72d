//! placing arenas into a root filesystem
//!
//! a placer puts one source tree at one target path and hands back an
//! [`Emplacement`] that knows how to undo it. the [`assembler`] composes
//! many placements into a rootfs and unwinds them in reverse.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::CancelToken;
use crate::workspace::Workspace;

pub mod assembler;
mod bind;
mod copy;
mod cow;

pub use assembler::{assemble, Assembly, AssemblyPart};
pub use bind::BindPlacer;
pub use copy::CopyPlacer;
pub use cow::{CowFs, CowPlacer};

/// puts a source tree at a target path
pub trait Placer: Send + Sync {
    /// place `src` at `dst`, which already exists with the same file type
    ///
    /// `writable` asks for a target the caller may modify; `bare` asks for
    /// the live source itself, so writes (if allowed) reach the source.
    fn place(
        &self,
        src: &Path,
        dst: &Path,
        writable: bool,
        bare: bool,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Emplacement>>;
}

/// one placement, undone by [`Emplacement::teardown`]
pub trait Emplacement: Send {
    /// where the source was placed
    fn target(&self) -> &Path;

    fn teardown(&self) -> Result<()>;
}

/// which placer to use, as written in configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacerChoice {
    /// inspect the host at construction time
    #[default]
    Auto,
    Copy,
    Bind,
    Overlay,
    Aufs,
}

impl PlacerChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacerChoice::Auto => "auto",
            PlacerChoice::Copy => "copy",
            PlacerChoice::Bind => "bind",
            PlacerChoice::Overlay => "overlay",
            PlacerChoice::Aufs => "aufs",
        }
    }
}

impl fmt::Display for PlacerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacerChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(PlacerChoice::Auto),
            "copy" => Ok(PlacerChoice::Copy),
            "bind" => Ok(PlacerChoice::Bind),
            "overlay" => Ok(PlacerChoice::Overlay),
            "aufs" => Ok(PlacerChoice::Aufs),
            other => Err(Error::InvalidPlacer(other.to_string())),
        }
    }
}

/// what a choice resolves to on this host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Copy,
    Bind,
    Cow(CowFs),
    /// bind for read-only and bare placements, copy for writable ones
    BindCopy,
}

fn resolve(choice: PlacerChoice, is_root: bool, filesystems: &str) -> Strategy {
    match choice {
        PlacerChoice::Copy => Strategy::Copy,
        PlacerChoice::Bind => Strategy::Bind,
        PlacerChoice::Overlay => Strategy::Cow(CowFs::Overlay),
        PlacerChoice::Aufs => Strategy::Cow(CowFs::Aufs),
        PlacerChoice::Auto if !is_root => Strategy::Copy,
        PlacerChoice::Auto => {
            // lines look like "nodev\toverlay" or "\text4"
            let supports = |name: &str| {
                filesystems
                    .lines()
                    .any(|line| line.split_whitespace().last() == Some(name))
            };
            if supports("overlay") {
                Strategy::Cow(CowFs::Overlay)
            } else if supports("aufs") {
                Strategy::Cow(CowFs::Aufs)
            } else {
                Strategy::BindCopy
            }
        }
    }
}

/// build the placer for `choice`, inspecting the host when it is `auto`
pub fn detect(choice: PlacerChoice, workspace: &Workspace) -> Arc<dyn Placer> {
    let is_root = nix::unistd::geteuid().is_root();
    let filesystems = if choice == PlacerChoice::Auto && is_root {
        fs::read_to_string("/proc/filesystems").unwrap_or_default()
    } else {
        String::new()
    };

    let strategy = resolve(choice, is_root, &filesystems);
    debug!(%choice, ?strategy, "selected placer");
    match strategy {
        Strategy::Copy => Arc::new(CopyPlacer),
        Strategy::Bind => Arc::new(BindPlacer),
        Strategy::Cow(fs) => Arc::new(CowPlacer::new(fs, workspace.clone())),
        Strategy::BindCopy => Arc::new(BindCopyPlacer),
    }
}

struct BindCopyPlacer;

impl Placer for BindCopyPlacer {
    fn place(
        &self,
        src: &Path,
        dst: &Path,
        writable: bool,
        bare: bool,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Emplacement>> {
        if writable && !bare {
            CopyPlacer.place(src, dst, writable, bare, cancel)
        } else {
            BindPlacer.place(src, dst, writable, bare, cancel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const WITH_OVERLAY: &str = "nodev\tsysfs\nnodev\ttmpfs\n\text4\nnodev\toverlay\n";
    const WITH_AUFS: &str = "nodev\tsysfs\nnodev\taufs\n\text4\n";
    const PLAIN: &str = "nodev\tsysfs\n\text4\n";

    #[test]
    fn test_parse_choice() {
        assert_eq!("overlay".parse::<PlacerChoice>().unwrap(), PlacerChoice::Overlay);
        assert_eq!("auto".parse::<PlacerChoice>().unwrap(), PlacerChoice::Auto);
        let err = "rsync".parse::<PlacerChoice>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_choice_serde_lowercase() {
        let json = serde_json::to_string(&PlacerChoice::Aufs).unwrap();
        assert_eq!(json, "\"aufs\"");
        let back: PlacerChoice = serde_json::from_str("\"bind\"").unwrap();
        assert_eq!(back, PlacerChoice::Bind);
    }

    #[test]
    fn test_resolve_auto() {
        assert_eq!(resolve(PlacerChoice::Auto, false, WITH_OVERLAY), Strategy::Copy);
        assert_eq!(
            resolve(PlacerChoice::Auto, true, WITH_OVERLAY),
            Strategy::Cow(CowFs::Overlay)
        );
        assert_eq!(
            resolve(PlacerChoice::Auto, true, WITH_AUFS),
            Strategy::Cow(CowFs::Aufs)
        );
        assert_eq!(resolve(PlacerChoice::Auto, true, PLAIN), Strategy::BindCopy);
    }

    #[test]
    fn test_resolve_explicit_ignores_host() {
        assert_eq!(resolve(PlacerChoice::Bind, false, PLAIN), Strategy::Bind);
        assert_eq!(resolve(PlacerChoice::Copy, true, WITH_OVERLAY), Strategy::Copy);
        assert_eq!(
            resolve(PlacerChoice::Overlay, false, PLAIN),
            Strategy::Cow(CowFs::Overlay)
        );
    }
}
