//! unordered record accumulation and whole-tree hashing
//!
//! a [`Bucket`] collects one [`Record`] per node while a filesystem or
//! archive is walked in whatever order is convenient. hashing sorts the
//! records by path, rebuilds the tree shape from the sorted list and feeds a
//! single pre-order walk into one running SHA-384.

mod tree;

use sha2::{Digest, Sha384};

use crate::canon;
use crate::error::Result;
use crate::hash::{CommitId, ContentHash};
use crate::types::Metadata;

pub use tree::{Node, Tree};

/// one hashed node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub metadata: Metadata,
    /// content hash for regular files, None for everything else
    pub content_hash: Option<ContentHash>,
}

/// unordered collection of records describing one tree
#[derive(Debug, Default)]
pub struct Bucket {
    records: Vec<Record>,
    sorted: bool,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a node; may be called in any order
    pub fn record(&mut self, mut metadata: Metadata, content_hash: Option<ContentHash>) {
        metadata.canonicalize();
        self.records.push(Record {
            metadata,
            content_hash,
        });
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// sort records by path and rebuild the tree shape
    ///
    /// fails with `MissingTree` if a node's parent directory was never
    /// recorded, and `FileCollision` if a path was recorded twice.
    pub fn tree(&mut self) -> Result<Tree<'_>> {
        if !self.sorted {
            self.records
                .sort_by(|a, b| a.metadata.name.as_bytes().cmp(b.metadata.name.as_bytes()));
            self.sorted = true;
        }
        Tree::build(&self.records)
    }

    /// compute the whole-tree hash
    pub fn hash(&mut self) -> Result<CommitId> {
        let tree = self.tree()?;
        let mut hasher = Sha384::new();
        let mut buf = Vec::with_capacity(128);
        for node in tree.iter() {
            buf.clear();
            canon::encode_into(&node.record.metadata, &mut buf)?;
            hasher.update(&buf);
            if let Some(hash) = &node.record.content_hash {
                hasher.update(hash.as_bytes());
            }
        }
        Ok(CommitId::from_digest(&hasher.finalize()))
    }
}
