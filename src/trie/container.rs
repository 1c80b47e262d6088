//! Lazy or resolved references to nodes

use super::node::Node;
use crate::model::Hash;
use crate::store::KvBackend;
use crate::{Error, Result};

/// A reference to a node, possibly already decoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeContainer {
    /// No node (empty tree or empty slot)
    Empty,
    /// A bare hash, read from the node store on access
    Hash(Hash),
    /// A decoded node held in memory, with its identity hash
    Resolved { hash: Hash, node: Node },
}

impl NodeContainer {
    /// Wrap an already decoded node
    pub fn resolved(node: Node) -> Result<Self> {
        let hash = node.hash()?;
        Ok(NodeContainer::Resolved { hash, node })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeContainer::Empty)
    }

    /// Identity hash of the referenced node, if any
    pub fn hash(&self) -> Option<Hash> {
        match self {
            NodeContainer::Empty => None,
            NodeContainer::Hash(hash) => Some(*hash),
            NodeContainer::Resolved { hash, .. } => Some(*hash),
        }
    }

    /// The decoded node, reading it from `nodes` when only a hash is held
    pub fn resolve<B: KvBackend>(&self, nodes: &B) -> Result<Option<(Hash, Node)>> {
        match self {
            NodeContainer::Empty => Ok(None),
            NodeContainer::Resolved { hash, node } => Ok(Some((*hash, node.clone()))),
            NodeContainer::Hash(hash) => Ok(Some((*hash, load_node(nodes, hash)?))),
        }
    }
}

impl Default for NodeContainer {
    fn default() -> Self {
        NodeContainer::Empty
    }
}

impl From<Option<Hash>> for NodeContainer {
    fn from(hash: Option<Hash>) -> Self {
        hash.map_or(NodeContainer::Empty, NodeContainer::Hash)
    }
}

/// Read and decode a node record
pub(crate) fn load_node<B: KvBackend>(nodes: &B, hash: &Hash) -> Result<Node> {
    let raw = nodes
        .get(hash.as_bytes())?
        .ok_or(Error::MissingNode(*hash))?;
    Node::decode(&raw)
}
