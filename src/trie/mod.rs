//! Content-addressed Merkle-Patricia trie
//!
//! Keys are split into 4-bit nibbles and stored along paths of three node
//! kinds: leaves holding a value reference, extensions compressing a run of
//! shared nibbles, and 16-way branches. Every node is identified by the
//! hash of its encoding, so the root hash commits to the whole mapping and
//! unchanged subtrees are shared between versions.
//!
//! The tree is kept in one canonical shape for a given set of entries: an
//! extension always points at a branch, and a branch always holds at least
//! two of (children, value). Two trees with the same entries therefore have
//! the same root hash, whatever order the entries were written in.

mod container;
mod inspect;
mod node;
mod stack;
mod tree;

pub use container::NodeContainer;
pub use inspect::TreeStats;
pub use node::{hash_encoded, Node, NodeKind, BRANCH_WIDTH};
pub use stack::{StackEntry, TraversalStack};
pub use tree::{value_ref, MerkleTrie};

use crate::model::Hash;

/// Root hash of a tree with no entries
pub const EMPTY_ROOT: Hash = Hash::ZERO;
