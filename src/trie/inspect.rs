//! Whole-tree walks: listing, verification and debug printing
//!
//! Walks keep their own work list instead of recursing, so deep trees don't
//! grow the call stack.

use super::container::NodeContainer;
use super::node::{hash_encoded, Node, NodeKind};
use super::tree::MerkleTrie;
use crate::model::{Hash, Nibbles};
use crate::store::KvBackend;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Node counts gathered by [`MerkleTrie::verify`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub leaves: usize,
    pub extensions: usize,
    pub branches: usize,
    /// Stored keys
    pub values: usize,
    /// Nodes on the longest root-to-leaf walk
    pub max_depth: usize,
}

impl TreeStats {
    pub fn nodes(&self) -> usize {
        self.leaves + self.extensions + self.branches
    }
}

fn key_of(path: &Nibbles) -> Result<Vec<u8>> {
    path.to_key().ok_or_else(|| {
        Error::CorruptEncoding(format!("value stored at odd-length path {}", path))
    })
}

impl<B: KvBackend> MerkleTrie<B> {
    /// Key and value reference of every entry under `root`, in key order
    ///
    /// `root` may be any root previously produced over the same node store.
    pub fn value_refs_at(&self, root: Hash) -> Result<BTreeMap<Vec<u8>, Hash>> {
        let start = if root.is_empty_root() {
            NodeContainer::Empty
        } else if root == self.root_hash() {
            self.root_node().clone()
        } else if self.stores().nodes().exists(root.as_bytes())? {
            NodeContainer::Hash(root)
        } else {
            return Err(Error::RootNotFound(root));
        };

        Ok(self
            .collect_refs(&start, &Nibbles::new())?
            .into_iter()
            .collect())
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let refs = self.collect_refs(self.root_node(), &Nibbles::from_bytes(prefix))?;
        let mut entries = Vec::with_capacity(refs.len());
        for (key, reference) in refs {
            let value = self
                .stores()
                .user()
                .get(&key)?
                .ok_or_else(|| Error::MissingValue(hex::encode(&key)))?;
            if super::tree::value_ref(&value) != reference {
                return Err(Error::ValueMismatch(hex::encode(&key)));
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Number of keys in the tree
    pub fn len(&self) -> Result<usize> {
        Ok(self.collect_refs(self.root_node(), &Nibbles::new())?.len())
    }

    /// Depth-first walk collecting value references under `prefix`
    fn collect_refs(
        &self,
        start: &NodeContainer,
        prefix: &Nibbles,
    ) -> Result<Vec<(Vec<u8>, Hash)>> {
        let mut found = Vec::new();
        let mut work = vec![(start.clone(), Nibbles::new())];

        while let Some((container, walked)) = work.pop() {
            if !walked.starts_with(prefix) && !prefix.starts_with(&walked) {
                continue;
            }
            let Some((_, node)) = container.resolve(self.stores().nodes())? else {
                continue;
            };

            match node {
                Node::Leaf { path, value } => {
                    let full = walked.concat(&path);
                    if full.starts_with(prefix) {
                        found.push((key_of(&full)?, value));
                    }
                }
                Node::Extension { path, child } => {
                    work.push((NodeContainer::Hash(child), walked.concat(&path)));
                }
                Node::Branch { children, value } => {
                    if let Some(value) = value {
                        if walked.starts_with(prefix) {
                            found.push((key_of(&walked)?, value));
                        }
                    }
                    // Reversed so the lowest slot is popped first
                    for (slot, child) in children.iter().enumerate().rev() {
                        if let Some(hash) = child {
                            let mut next = walked.clone();
                            next.push(slot as u8);
                            work.push((NodeContainer::Hash(*hash), next));
                        }
                    }
                }
            }
        }

        Ok(found)
    }

    /// Check every reachable node record
    ///
    /// Each record must exist, hash to the reference that points at it,
    /// decode, and have a canonical shape: extensions have a non-empty path
    /// and point at a branch, branches have at least two entries.
    pub fn verify(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let Some(root) = self.root_node().hash() else {
            return Ok(stats);
        };

        // (hash, depth, parent is an extension)
        let mut work = vec![(root, 1usize, false)];
        while let Some((hash, depth, under_extension)) = work.pop() {
            let raw = self
                .stores()
                .nodes()
                .get(hash.as_bytes())?
                .ok_or(Error::MissingNode(hash))?;
            if hash_encoded(&raw) != hash {
                return Err(Error::CorruptEncoding(format!(
                    "record {} does not match its hash",
                    hash
                )));
            }
            let node = Node::decode(&raw)?;
            node.check_shape()?;
            if under_extension && node.kind() != NodeKind::Branch {
                return Err(Error::InvalidNodeShape(format!(
                    "extension points at a {:?} node {}",
                    node.kind(),
                    hash
                )));
            }

            stats.max_depth = stats.max_depth.max(depth);
            match &node {
                Node::Leaf { .. } => {
                    stats.leaves += 1;
                    stats.values += 1;
                }
                Node::Extension { child, .. } => {
                    stats.extensions += 1;
                    work.push((*child, depth + 1, true));
                }
                Node::Branch { value, .. } => {
                    stats.branches += 1;
                    if value.is_some() {
                        stats.values += 1;
                    }
                    for (_, child) in node.children() {
                        work.push((child, depth + 1, false));
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Depth-first rendering of the tree, one node per line
    pub fn print(&self) -> Result<String> {
        let mut out = String::new();
        let Some(root) = self.root_node().hash() else {
            out.push_str("Empty tree\n");
            return Ok(out);
        };
        let _ = writeln!(out, "Merkle tree: root hash {}", root);

        let mut work = vec![(self.root_node().clone(), 0usize, String::new())];
        while let Some((container, depth, label)) = work.pop() {
            let Some((hash, node)) = container.resolve(self.stores().nodes())? else {
                continue;
            };
            let _ = writeln!(
                out,
                "{:indent$}{}{} <{}>",
                "",
                label,
                node,
                hash.short(),
                indent = depth * 2
            );

            match &node {
                Node::Leaf { .. } => {}
                Node::Extension { child, .. } => {
                    work.push((NodeContainer::Hash(*child), depth + 1, String::new()));
                }
                Node::Branch { children, .. } => {
                    for (slot, child) in children.iter().enumerate().rev() {
                        if let Some(hash) = child {
                            work.push((
                                NodeContainer::Hash(*hash),
                                depth + 1,
                                format!("{:x}: ", slot),
                            ));
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}
