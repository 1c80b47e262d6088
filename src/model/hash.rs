//! Hashes that name trie nodes and caller values
//!
//! A node is identified by the BLAKE3 digest of its canonical record, and
//! the node store is keyed by those 32 bytes. Leaves and branches refer to
//! caller values by the digest of the value bytes, so a root hash commits
//! to every value below it. The all-zero hash is reserved for the root of
//! a tree with no entries.

use serde::{Deserialize, Serialize};
use std::fmt;

const HASH_LEN: usize = 32;

/// Node identity or value reference
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Root of the empty tree; no node record is stored under it
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Identity of a node record, or reference to a caller value
    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Digest of several byte runs as if they were concatenated
    ///
    /// Log records use a prefix of this as their checksum.
    pub fn digest_many(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Hash(*hasher.finalize().as_bytes())
    }

    /// Read a node key or record field; `None` unless exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    /// The node store key for the record this hash names
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Root hashes are passed between CLI invocations as hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Hash::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Six hex digits, used when printing nodes and traversal stacks
    pub fn short(&self) -> String {
        self.to_hex()[..6].to_string()
    }

    pub fn is_empty_root(&self) -> bool {
        *self == Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty_root() {
            write!(f, "Hash(empty)")
        } else {
            write!(f, "Hash({})", self.short())
        }
    }
}
