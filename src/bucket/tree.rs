use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::parent_name;

use super::Record;

/// tree shape recovered from a path-sorted record list
///
/// record i is a child of record j (j < i) iff j is a directory whose path
/// is a prefix of i's path and no record between them is also such a
/// prefix. because directory paths end in `/`, every subtree is contiguous
/// in sorted order, so index order is pre-order.
pub struct Tree<'a> {
    records: &'a [Record],
    parents: Vec<Option<usize>>,
    depths: Vec<usize>,
}

/// one node of a [`Tree`] walk
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    pub index: usize,
    pub record: &'a Record,
    /// index of the parent record, None for the root
    pub parent: Option<usize>,
    /// 0 for the root
    pub depth: usize,
}

impl<'a> Tree<'a> {
    /// rebuild the tree from records already sorted by path
    pub(super) fn build(records: &'a [Record]) -> Result<Self> {
        // `./a` and `./a/` name the same path
        let mut paths = HashSet::with_capacity(records.len());
        for record in records {
            if !paths.insert(record.metadata.relative_path()) {
                return Err(Error::FileCollision(record.metadata.name.clone()));
            }
        }

        let root = match records.first() {
            Some(r) if r.metadata.is_root() => r,
            _ => return Err(Error::MissingTree("./".to_string())),
        };
        if !root.metadata.is_dir() {
            return Err(Error::corrupt("tree root is not a directory"));
        }

        let mut parents = vec![None; records.len()];
        let mut depths = vec![0; records.len()];
        // open directories, innermost last
        let mut stack: Vec<usize> = vec![0];

        for (i, record) in records.iter().enumerate().skip(1) {
            let name = &record.metadata.name;
            while let Some(&top) = stack.last() {
                if name.starts_with(records[top].metadata.name.as_str()) {
                    break;
                }
                stack.pop();
            }

            // the root prefixes everything, so the stack never empties
            let parent = *stack.last().ok_or_else(|| Error::MissingTree("./".to_string()))?;
            let expected = parent_name(name).unwrap_or_default();
            if records[parent].metadata.name != expected {
                return Err(Error::MissingTree(expected));
            }

            parents[i] = Some(parent);
            depths[i] = depths[parent] + 1;
            if record.metadata.is_dir() {
                stack.push(i);
            }
        }

        Ok(Self {
            records,
            parents,
            depths,
        })
    }

    /// the sorted records
    pub fn records(&self) -> &'a [Record] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn node(&self, index: usize) -> Node<'a> {
        Node {
            index,
            record: &self.records[index],
            parent: self.parents[index],
            depth: self.depths[index],
        }
    }

    /// pre-order walk, root first
    pub fn iter(&self) -> impl Iterator<Item = Node<'a>> + '_ {
        (0..self.records.len()).map(move |i| self.node(i))
    }

    /// direct children of the record at `index`, in path order
    pub fn children(&self, index: usize) -> impl Iterator<Item = Node<'a>> + '_ {
        (index + 1..self.records.len())
            .take_while(move |&i| self.depths[i] > self.depths[index])
            .filter(move |&i| self.parents[i] == Some(index))
            .map(move |i| self.node(i))
    }
}
