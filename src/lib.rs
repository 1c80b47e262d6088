//! # patricia_db
//!
//! A content-addressed Merkle-Patricia trie over two embedded key-value
//! stores.
//!
//! Caller values live in the user store under their own key. The trie
//! itself lives in the node store, where each node is kept under the hash of
//! its encoding. The root hash therefore identifies the full mapping, and
//! any earlier root can be reopened as long as its node store is kept.
//!
//! ## Core Concepts
//!
//! - **Nibble paths**: keys are walked 4 bits at a time
//! - **Nodes**: leaves, extensions (shared path runs) and 16-way branches
//! - **Roots**: the hash of the root node, or [`EMPTY_ROOT`] for no entries
//!
//! ## Example
//!
//! ```ignore
//! use patricia_db::MerkleTrie;
//!
//! let mut trie = MerkleTrie::new_empty("user.db", "nodes.db")?;
//! trie.put(b"alice", b"100")?;
//! let root = trie.root_hash();
//! trie.close_data_stores()?;
//!
//! let trie = MerkleTrie::open(root, "user.db", "nodes.db")?;
//! assert_eq!(trie.get(b"alice")?.0, Some(b"100".to_vec()));
//! ```

pub mod config;
pub mod model;
pub mod ops;
pub mod store;
pub mod trie;

mod error;

pub use config::StoreConfig;
pub use error::{Error, Result, StoreError};
pub use model::{Hash, Nibbles};
pub use ops::{diff_roots, Diff, DiffEntry};
pub use store::{DataStores, FileStore, KvBackend, MemoryStore};
pub use trie::{
    MerkleTrie, Node, NodeContainer, NodeKind, TraversalStack, TreeStats, EMPTY_ROOT,
};

/// Store file format version
pub const VERSION: u32 = 1;

/// Magic bytes at the start of every store log
pub const MAGIC: &[u8; 8] = b"PATRICIA";
