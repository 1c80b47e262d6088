//! Record of the nodes visited while resolving a key

use super::node::Node;
use crate::model::{Hash, Nibbles};
use std::fmt;

/// One visited node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackEntry {
    pub hash: Hash,
    pub node: Node,
    /// Key nibbles consumed before arriving at this node
    pub matched: Nibbles,
}

/// Visited nodes, root first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraversalStack {
    entries: Vec<StackEntry>,
}

impl TraversalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, hash: Hash, node: Node, matched: Nibbles) {
        self.entries.push(StackEntry {
            hash,
            node,
            matched,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The root entry
    pub fn root(&self) -> Option<&StackEntry> {
        self.entries.first()
    }

    /// The innermost entry: the final match or the point of divergence
    pub fn last(&self) -> Option<&StackEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackEntry> {
        self.entries.iter()
    }
}

impl fmt::Display for TraversalStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, entry) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "{:>2} [{}] {} {}",
                depth,
                entry.matched,
                entry.hash.short(),
                entry.node
            )?;
        }
        Ok(())
    }
}
