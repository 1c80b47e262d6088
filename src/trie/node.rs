//! Trie node types and their canonical encoding
//!
//! Every node is stored as a [`NodeRecord`] serialized with bincode
//! (fixed-width little-endian integers, trailing bytes rejected). The
//! BLAKE3 hash of those bytes is the node's identity.

use crate::model::{Hash, Nibbles};
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of child slots in a branch
pub const BRANCH_WIDTH: usize = 16;

/// Node type discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Extension,
    Branch,
}

impl NodeKind {
    pub fn as_byte(&self) -> u8 {
        match self {
            NodeKind::Leaf => 0,
            NodeKind::Extension => 1,
            NodeKind::Branch => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(NodeKind::Leaf),
            1 => Some(NodeKind::Extension),
            2 => Some(NodeKind::Branch),
            _ => None,
        }
    }
}

/// A node in the trie
///
/// Nodes are immutable once persisted. Any change builds a new node with a
/// new hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// End of a key: the remaining path and a reference to the value
    Leaf { path: Nibbles, value: Hash },
    /// A shared path segment leading to a single child
    Extension { path: Nibbles, child: Hash },
    /// One child slot per nibble, plus a value for a key ending here
    Branch {
        children: [Option<Hash>; BRANCH_WIDTH],
        value: Option<Hash>,
    },
}

/// On-disk layout of a node
#[derive(Serialize, Deserialize)]
struct NodeRecord {
    kind: u8,
    parity: bool,
    path: Vec<u8>,
    value: Option<Hash>,
    children: Vec<Option<Hash>>,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

impl Node {
    pub fn leaf(path: Nibbles, value: Hash) -> Self {
        Node::Leaf { path, value }
    }

    pub fn extension(path: Nibbles, child: Hash) -> Self {
        Node::Extension { path, child }
    }

    pub fn branch(children: [Option<Hash>; BRANCH_WIDTH], value: Option<Hash>) -> Self {
        Node::Branch { children, value }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Leaf { .. } => NodeKind::Leaf,
            Node::Extension { .. } => NodeKind::Extension,
            Node::Branch { .. } => NodeKind::Branch,
        }
    }

    /// The node's own path segment (empty for branches)
    pub fn path(&self) -> Nibbles {
        match self {
            Node::Leaf { path, .. } | Node::Extension { path, .. } => path.clone(),
            Node::Branch { .. } => Nibbles::new(),
        }
    }

    /// True when the node's path has an odd number of nibbles
    pub fn parity(&self) -> bool {
        match self {
            Node::Leaf { path, .. } | Node::Extension { path, .. } => path.parity(),
            Node::Branch { .. } => false,
        }
    }

    /// The value reference held directly by this node
    pub fn value(&self) -> Option<Hash> {
        match self {
            Node::Leaf { value, .. } => Some(*value),
            Node::Branch { value, .. } => *value,
            Node::Extension { .. } => None,
        }
    }

    /// Present children as `(nibble, hash)` pairs
    pub fn children(&self) -> Vec<(u8, Hash)> {
        match self {
            Node::Leaf { .. } => Vec::new(),
            Node::Extension { child, .. } => vec![(0, *child)],
            Node::Branch { children, .. } => children
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.map(|h| (i as u8, h)))
                .collect(),
        }
    }

    /// Reject shapes a canonical trie never contains
    pub fn check_shape(&self) -> Result<()> {
        match self {
            Node::Leaf { .. } => Ok(()),
            Node::Extension { path, .. } => {
                if path.is_empty() {
                    return Err(Error::InvalidNodeShape("extension with empty path".into()));
                }
                Ok(())
            }
            Node::Branch { children, value } => {
                let count = children.iter().filter(|c| c.is_some()).count();
                match (count, value) {
                    (0, None) => Err(Error::InvalidNodeShape("branch with no children and no value".into())),
                    (1, None) => Err(Error::InvalidNodeShape("branch with a single child and no value".into())),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Canonical encoding; fails on forbidden shapes
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_shape()?;

        let record = match self {
            Node::Leaf { path, value } => {
                let (packed, parity) = path.to_bytes();
                NodeRecord {
                    kind: NodeKind::Leaf.as_byte(),
                    parity,
                    path: packed,
                    value: Some(*value),
                    children: Vec::new(),
                }
            }
            Node::Extension { path, child } => {
                let (packed, parity) = path.to_bytes();
                NodeRecord {
                    kind: NodeKind::Extension.as_byte(),
                    parity,
                    path: packed,
                    value: None,
                    children: vec![Some(*child)],
                }
            }
            Node::Branch { children, value } => NodeRecord {
                kind: NodeKind::Branch.as_byte(),
                parity: false,
                path: Vec::new(),
                value: *value,
                children: children.to_vec(),
            },
        };

        codec()
            .serialize(&record)
            .map_err(|e| Error::InvalidNodeShape(format!("unencodable node: {}", e)))
    }

    /// Decode a stored record
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let record: NodeRecord = codec()
            .deserialize(raw)
            .map_err(|e| Error::CorruptEncoding(e.to_string()))?;

        let kind = NodeKind::from_byte(record.kind)
            .ok_or_else(|| Error::CorruptEncoding(format!("unknown node type {}", record.kind)))?;
        let path = Nibbles::from_packed(&record.path, record.parity)?;

        let node = match kind {
            NodeKind::Leaf => {
                if !record.children.is_empty() {
                    return Err(Error::CorruptEncoding("leaf with children".into()));
                }
                let value = record
                    .value
                    .ok_or_else(|| Error::CorruptEncoding("leaf without value".into()))?;
                Node::Leaf { path, value }
            }
            NodeKind::Extension => {
                if record.value.is_some() {
                    return Err(Error::CorruptEncoding("extension with value".into()));
                }
                let child = match record.children.as_slice() {
                    [Some(child)] => *child,
                    _ => {
                        return Err(Error::CorruptEncoding(format!(
                            "extension needs exactly one child, found {} slots",
                            record.children.len()
                        )))
                    }
                };
                Node::Extension { path, child }
            }
            NodeKind::Branch => {
                if record.parity || !record.path.is_empty() {
                    return Err(Error::CorruptEncoding("branch with a path".into()));
                }
                let children: [Option<Hash>; BRANCH_WIDTH] =
                    record.children.try_into().map_err(|c: Vec<Option<Hash>>| {
                        Error::CorruptEncoding(format!("branch has {} child slots", c.len()))
                    })?;
                Node::Branch {
                    children,
                    value: record.value,
                }
            }
        };
        Ok(node)
    }

    /// Encode and hash in one step
    pub fn encode_with_hash(&self) -> Result<(Hash, Vec<u8>)> {
        let raw = self.encode()?;
        Ok((hash_encoded(&raw), raw))
    }

    /// Identity hash of this node
    pub fn hash(&self) -> Result<Hash> {
        Ok(self.encode_with_hash()?.0)
    }
}

/// Hash a canonical node encoding
pub fn hash_encoded(raw: &[u8]) -> Hash {
    Hash::digest(raw)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Leaf { path, value } => write!(f, "Leaf [{}] -> value {}", path, value.short()),
            Node::Extension { path, child } => {
                write!(f, "Extension [{}] -> {}", path, child.short())
            }
            Node::Branch { children, value } => {
                write!(f, "Branch {{")?;
                let mut first = true;
                for (i, child) in children.iter().enumerate() {
                    if let Some(h) = child {
                        if !first {
                            write!(f, ",")?;
                        }
                        write!(f, " {:x}: {}", i, h.short())?;
                        first = false;
                    }
                }
                write!(f, " }}")?;
                if let Some(v) = value {
                    write!(f, " value {}", v.short())?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_child_branch() -> Node {
        let mut children = [None; BRANCH_WIDTH];
        children[1] = Some(Hash::digest(b"one"));
        children[0xf] = Some(Hash::digest(b"fifteen"));
        Node::branch(children, None)
    }

    #[test]
    fn test_leaf_roundtrip_odd_path() {
        let node = Node::leaf(Nibbles::from_raw(vec![6, 1, 6]), Hash::digest(b"v"));
        assert!(node.parity());
        let decoded = Node::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_extension_and_branch_roundtrip() {
        let ext = Node::extension(Nibbles::from_bytes(b"al"), Hash::digest(b"child"));
        assert_eq!(Node::decode(&ext.encode().unwrap()).unwrap(), ext);

        let branch = two_child_branch();
        assert_eq!(Node::decode(&branch.encode().unwrap()).unwrap(), branch);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = Node::leaf(Nibbles::from_bytes(b"key"), Hash::digest(b"value"));
        let b = Node::leaf(Nibbles::from_bytes(b"key"), Hash::digest(b"value"));
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_parity_changes_hash() {
        let value = Hash::digest(b"v");
        let even = Node::leaf(Nibbles::from_raw(vec![0, 0xa]), value);
        let odd = Node::leaf(Nibbles::single(0xa), value);
        assert_ne!(even.hash().unwrap(), odd.hash().unwrap());
    }

    #[test]
    fn test_forbidden_shapes() {
        let ext = Node::extension(Nibbles::new(), Hash::digest(b"c"));
        assert!(matches!(ext.encode(), Err(Error::InvalidNodeShape(_))));

        let empty = Node::branch([None; BRANCH_WIDTH], None);
        assert!(matches!(empty.encode(), Err(Error::InvalidNodeShape(_))));

        let mut children = [None; BRANCH_WIDTH];
        children[3] = Some(Hash::digest(b"only"));
        let single = Node::branch(children, None);
        assert!(matches!(single.encode(), Err(Error::InvalidNodeShape(_))));

        // A single child is fine when the branch holds a value
        let valued = Node::branch(children, Some(Hash::digest(b"v")));
        assert!(valued.encode().is_ok());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut raw = Node::leaf(Nibbles::single(1), Hash::digest(b"v"))
            .encode()
            .unwrap();
        raw[0] = 9;
        assert!(matches!(Node::decode(&raw), Err(Error::CorruptEncoding(_))));
    }

    #[test]
    fn test_decode_rejects_truncation_and_trailing_bytes() {
        let raw = two_child_branch().encode().unwrap();
        assert!(matches!(
            Node::decode(&raw[..raw.len() - 1]),
            Err(Error::CorruptEncoding(_))
        ));

        let mut padded = raw.clone();
        padded.push(0);
        assert!(matches!(Node::decode(&padded), Err(Error::CorruptEncoding(_))));
    }

    #[test]
    fn test_decode_rejects_inconsistent_record() {
        let record = NodeRecord {
            kind: NodeKind::Branch.as_byte(),
            parity: false,
            path: Vec::new(),
            value: None,
            children: vec![None; 3],
        };
        let raw = codec().serialize(&record).unwrap();
        assert!(matches!(Node::decode(&raw), Err(Error::CorruptEncoding(_))));

        let record = NodeRecord {
            kind: NodeKind::Leaf.as_byte(),
            parity: false,
            path: vec![0x12],
            value: None,
            children: Vec::new(),
        };
        let raw = codec().serialize(&record).unwrap();
        assert!(matches!(Node::decode(&raw), Err(Error::CorruptEncoding(_))));
    }

    #[test]
    fn test_children_listing() {
        let branch = two_child_branch();
        let kids: Vec<u8> = branch.children().iter().map(|(n, _)| *n).collect();
        assert_eq!(kids, vec![1, 0xf]);
        assert_eq!(branch.kind(), NodeKind::Branch);
        assert!(branch.path().is_empty());
    }
}
