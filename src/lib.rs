//! transmat - deterministic filesystem trees, shipped as wares
//!
//! a *ware* is a filesystem tree identified by a hash of its content and
//! attributes. transmats pack trees into wares (scan) and unpack wares back
//! into trees (materialize), moving them through *warehouses*. materialized
//! trees can then be composed into a root filesystem by a placer.
//!
//! # Core concepts
//!
//! - **Metadata**: per-node attributes, canonically encoded as CBOR
//! - **Bucket**: the records of a scanned tree, hashed into a [`CommitId`]
//! - **Warehouse**: a `file://`, `file+ca://`, `http(s)://` or
//!   `http(s)+ca://` location storing wares
//! - **Transmat**: packs and unpacks one ware format (`tar`, `dir`)
//! - **Arena**: a materialized ware on local disk
//! - **Placer**: puts arenas into a rootfs, by copy, bind or union mount
//!
//! # Hash format
//!
//! commit id = base64url(SHA384(for each node in pre-order: cbor(metadata) | content_hash))
//!
//! where content_hash is the SHA384 of a regular file's bytes and absent
//! for every other node type.
//!
//! # Example usage
//!
//! ```no_run
//! use transmat::{MaterializeOptions, ScanOptions, SiloUri, Transmat, TransmatKind, Workspace};
//! use std::path::Path;
//!
//! let ws = Workspace::open(Path::new("/var/lib/transmat")).unwrap();
//! let stack = transmat::transmat::standard(&ws);
//! let tar = TransmatKind::from("tar");
//! let store = vec![SiloUri::parse("file+ca:///srv/wares").unwrap()];
//!
//! // pack a directory into the warehouse
//! let id = stack.scan(&tar, Path::new("/source"), &store, &ScanOptions::default()).unwrap();
//!
//! // and unpack it again, served from the workspace cache next time
//! let arena = stack.materialize(&tar, &id, &store, &MaterializeOptions::default()).unwrap();
//! println!("{} at {}", arena.hash(), arena.path().display());
//! ```

mod config;
mod error;
mod hash;
mod progress;
mod workspace;

pub mod bucket;
pub mod canon;
pub mod filter;
pub mod fs;
pub mod placer;
pub mod provision;
pub mod transmat;
pub mod types;
pub mod warehouse;

pub use bucket::{Bucket, Record, Tree};
pub use config::Config;
pub use error::{Error, ErrorKind, IoResultExt, Result};
pub use filter::{Filter, Filters};
pub use hash::{CommitId, ContentHash, HashingReader, DIGEST_LEN};
pub use placer::{assemble, detect, Assembly, AssemblyPart, Emplacement, Placer, PlacerChoice};
pub use progress::{CancelToken, NoProgress, ProgressCounter, ProgressSink};
pub use provision::{materialize_all, provision, Input};
pub use transmat::{Arena, MaterializeOptions, ScanOptions, Transmat, TransmatKind};
pub use types::{Metadata, TypeFlag, Xattr};
pub use warehouse::{SiloUri, Warehouse};
pub use workspace::Workspace;
