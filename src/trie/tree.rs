//! Merkle-Patricia trie engine
//!
//! Lookups walk from the root, consuming key nibbles at extensions and
//! branches. Mutations record the walk as a list of [`Frame`]s, build the
//! replacement for the node where the walk ended, then fold the frames back
//! up to the root, producing a new node (and hash) for every ancestor. All
//! new records are written to the node store in one batch before the root
//! pointer moves.

use super::container::{load_node, NodeContainer};
use super::node::{Node, BRANCH_WIDTH};
use super::stack::TraversalStack;
use super::EMPTY_ROOT;
use crate::config::StoreConfig;
use crate::model::{Hash, Nibbles};
use crate::store::{DataStores, FileStore, KvBackend, WriteBatch};
use crate::{Error, Result};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Reference stored in the trie for a caller value
pub fn value_ref(value: &[u8]) -> Hash {
    Hash::digest(value)
}

/// A Merkle-Patricia trie over a user store and a node store
///
/// Mutations take `&mut self`; callers sharing a trie across threads must
/// serialize `put`/`delete` themselves. Reads take `&self` and only ever see
/// fully written, immutable nodes.
pub struct MerkleTrie<B: KvBackend = FileStore> {
    stores: DataStores<B>,
    root: NodeContainer,
}

/// An ancestor on the walk that must be rebuilt after an edit
enum Frame {
    Extension {
        path: Nibbles,
    },
    Branch {
        children: [Option<Hash>; BRANCH_WIDTH],
        value: Option<Hash>,
        slot: u8,
    },
}

/// Where a walk stopped
enum Terminal {
    /// Empty tree or empty branch slot
    Vacant,
    Leaf { path: Nibbles, value: Hash },
    /// An extension whose path diverges from the key
    Extension { path: Nibbles, child: Hash },
    /// The key ends exactly at this branch
    Branch {
        children: [Option<Hash>; BRANCH_WIDTH],
        value: Option<Hash>,
    },
}

struct Descent {
    frames: Vec<Frame>,
    stack: TraversalStack,
    terminal: Terminal,
    /// Key nibbles consumed before the terminal
    depth: usize,
}

/// What hangs below the old side of a split
enum Tail {
    Value(Hash),
    Child(Hash),
}

/// New node records waiting to be written
#[derive(Default)]
struct PendingNodes {
    batch: WriteBatch,
}

impl PendingNodes {
    /// Encode `node`, queue it, and return its hash
    fn stage(&mut self, node: &Node) -> Result<Hash> {
        let (hash, raw) = node.encode_with_hash()?;
        self.batch.put(hash.as_bytes().to_vec(), raw);
        Ok(hash)
    }
}

impl MerkleTrie<FileStore> {
    /// Create an empty tree over the stores at the given directories
    ///
    /// The stores are created if they don't already exist.
    pub fn new_empty(user_path: impl AsRef<Path>, node_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_stores(DataStores::open(user_path, node_path)?))
    }

    pub fn new_empty_with_config(
        user_path: impl AsRef<Path>,
        user_config: StoreConfig,
        node_path: impl AsRef<Path>,
        node_config: StoreConfig,
    ) -> Result<Self> {
        let stores = DataStores::open_with_config(user_path, user_config, node_path, node_config)?;
        Ok(Self::with_stores(stores))
    }

    /// Load the tree whose root is `root` from existing stores
    pub fn open(
        root: Hash,
        user_path: impl AsRef<Path>,
        node_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::from_root(DataStores::open(user_path, node_path)?, root)
    }

    pub fn open_with_config(
        root: Hash,
        user_path: impl AsRef<Path>,
        user_config: StoreConfig,
        node_path: impl AsRef<Path>,
        node_config: StoreConfig,
    ) -> Result<Self> {
        let stores = DataStores::open_with_config(user_path, user_config, node_path, node_config)?;
        Self::from_root(stores, root)
    }
}

impl<B: KvBackend> MerkleTrie<B> {
    /// An empty tree over the given stores
    pub fn with_stores(stores: DataStores<B>) -> Self {
        MerkleTrie {
            stores,
            root: NodeContainer::Empty,
        }
    }

    /// A tree rooted at `root`, which must exist in the node store
    ///
    /// [`EMPTY_ROOT`] yields an empty tree.
    pub fn from_root(stores: DataStores<B>, root: Hash) -> Result<Self> {
        if root.is_empty_root() {
            return Ok(Self::with_stores(stores));
        }

        let raw = stores
            .nodes()
            .get(root.as_bytes())?
            .ok_or(Error::RootNotFound(root))?;
        let node = Node::decode(&raw)?;
        if node.hash()? != root {
            return Err(Error::CorruptEncoding(format!(
                "record stored under {} has a different hash",
                root
            )));
        }

        debug!(root = %root, "loaded tree");
        Ok(MerkleTrie {
            stores,
            root: NodeContainer::Resolved { hash: root, node },
        })
    }

    /// Identity hash of the root, or [`EMPTY_ROOT`] for an empty tree
    pub fn root_hash(&self) -> Hash {
        self.root.hash().unwrap_or(EMPTY_ROOT)
    }

    pub fn root_node(&self) -> &NodeContainer {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn stores(&self) -> &DataStores<B> {
        &self.stores
    }

    /// Look up `key`, returning its value (if present) and the visited nodes
    pub fn get(&self, key: &[u8]) -> Result<(Option<Vec<u8>>, TraversalStack)> {
        let path = Nibbles::from_bytes(key);
        let descent = self.descend(&path)?;
        trace!(depth = descent.stack.len(), "get walk finished");

        let value = match Self::found(&path, &descent) {
            Some(reference) => Some(self.read_value(key, &reference)?),
            None => None,
        };
        Ok((value, descent.stack))
    }

    /// Whether the tree holds `key`, without reading the user store
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let path = Nibbles::from_bytes(key);
        let descent = self.descend(&path)?;
        Ok(Self::found(&path, &descent).is_some())
    }

    /// Store `value` under `key`
    ///
    /// The user value is written before the node batch. If the tree update
    /// fails, the key's previous user value is put back.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let user = self.stores.user();
        let previous = user.get(key)?;
        user.put(key, value)?;

        if let Err(e) = self.insert(key, value_ref(value)) {
            let restored = match previous {
                Some(previous) => self.stores.user().put(key, &previous),
                None => self.stores.user().delete(key),
            };
            if let Err(restore) = restored {
                warn!(error = %restore, "failed to restore user value after failed put");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Point `key` at `reference` in the tree and commit
    fn insert(&mut self, key: &[u8], reference: Hash) -> Result<()> {
        let path = Nibbles::from_bytes(key);
        let Descent {
            frames,
            stack,
            terminal,
            depth,
        } = self.descend(&path)?;
        trace!(depth = stack.len(), "put walk finished");

        let remaining = path.slice_from(depth);
        let mut pending = PendingNodes::default();

        let replacement = match terminal {
            Terminal::Vacant => Node::leaf(remaining, reference),
            Terminal::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path == remaining {
                    Node::leaf(remaining, reference)
                } else {
                    split(&mut pending, leaf_path, Tail::Value(value), remaining, reference)?
                }
            }
            Terminal::Extension {
                path: ext_path,
                child,
            } => split(&mut pending, ext_path, Tail::Child(child), remaining, reference)?,
            Terminal::Branch { children, .. } => Node::branch(children, Some(reference)),
        };

        let root = self.rebuild(frames, Some(replacement), &mut pending)?;
        self.commit(root, pending)
    }

    /// Remove `key` from the tree; removing an absent key is a no-op
    ///
    /// The user store entry is kept so older roots can still read it.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let path = Nibbles::from_bytes(key);
        let Descent {
            frames,
            stack,
            terminal,
            depth,
        } = self.descend(&path)?;
        trace!(depth = stack.len(), "delete walk finished");

        let remaining = path.slice_from(depth);
        let mut pending = PendingNodes::default();

        let replacement = match terminal {
            Terminal::Leaf {
                path: leaf_path, ..
            } if leaf_path == remaining => None,
            Terminal::Branch {
                children,
                value: Some(_),
            } => self.compact_branch(children, None, &mut pending)?,
            _ => {
                trace!("delete of absent key");
                return Ok(());
            }
        };

        let root = self.rebuild(frames, replacement, &mut pending)?;
        self.commit(root, pending)
    }

    /// Close both backing stores; safe to call more than once
    pub fn close_data_stores(&self) -> Result<()> {
        self.stores.close()?;
        Ok(())
    }

    /// Value reference for the key the walk followed, if it is present
    fn found(path: &Nibbles, descent: &Descent) -> Option<Hash> {
        match &descent.terminal {
            Terminal::Leaf {
                path: leaf_path,
                value,
            } if *leaf_path == path.slice_from(descent.depth) => Some(*value),
            Terminal::Branch { value, .. } => *value,
            _ => None,
        }
    }

    fn read_value(&self, key: &[u8], reference: &Hash) -> Result<Vec<u8>> {
        let value = self
            .stores
            .user()
            .get(key)?
            .ok_or_else(|| Error::MissingValue(hex::encode(key)))?;
        if value_ref(&value) != *reference {
            return Err(Error::ValueMismatch(hex::encode(key)));
        }
        Ok(value)
    }

    /// Walk from the root along `path`
    fn descend(&self, path: &Nibbles) -> Result<Descent> {
        let mut frames = Vec::new();
        let mut stack = TraversalStack::new();
        let mut cursor = self.root.clone();
        let mut depth = 0;

        loop {
            let Some((hash, node)) = cursor.resolve(self.stores.nodes())? else {
                return Ok(Descent {
                    frames,
                    stack,
                    terminal: Terminal::Vacant,
                    depth,
                });
            };
            stack.push(hash, node.clone(), path.slice(0, depth));

            let terminal = match node {
                Node::Leaf { path, value } => Terminal::Leaf { path, value },
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    if path.slice_from(depth).starts_with(&ext_path) {
                        depth += ext_path.len();
                        frames.push(Frame::Extension { path: ext_path });
                        cursor = NodeContainer::Hash(child);
                        continue;
                    }
                    Terminal::Extension {
                        path: ext_path,
                        child,
                    }
                }
                Node::Branch { children, value } => match path.get(depth) {
                    Some(slot) => {
                        cursor = children[slot as usize].into();
                        frames.push(Frame::Branch {
                            children,
                            value,
                            slot,
                        });
                        depth += 1;
                        continue;
                    }
                    None => Terminal::Branch { children, value },
                },
            };

            return Ok(Descent {
                frames,
                stack,
                terminal,
                depth,
            });
        }
    }

    /// Fold an edited subtree back up through its ancestors
    fn rebuild(
        &self,
        frames: Vec<Frame>,
        replacement: Option<Node>,
        pending: &mut PendingNodes,
    ) -> Result<Option<Node>> {
        let mut child = replacement;

        for frame in frames.into_iter().rev() {
            child = match frame {
                Frame::Extension { path } => match child {
                    Some(node) => Some(prepend(&path, node, pending)?),
                    None => None,
                },
                Frame::Branch {
                    mut children,
                    value,
                    slot,
                } => {
                    children[slot as usize] = None;
                    match child {
                        Some(node) if value.is_none() && children.iter().all(Option::is_none) => {
                            Some(prepend(&Nibbles::single(slot), node, pending)?)
                        }
                        Some(node) => {
                            children[slot as usize] = Some(pending.stage(&node)?);
                            Some(Node::branch(children, value))
                        }
                        None => self.compact_branch(children, value, pending)?,
                    }
                }
            };
        }

        Ok(child)
    }

    /// Bring a branch that may have lost a child or its value into canonical form
    fn compact_branch(
        &self,
        children: [Option<Hash>; BRANCH_WIDTH],
        value: Option<Hash>,
        pending: &mut PendingNodes,
    ) -> Result<Option<Node>> {
        let mut present = children
            .iter()
            .enumerate()
            .filter_map(|(slot, child)| child.map(|hash| (slot as u8, hash)));

        match (present.next(), present.next(), value) {
            (None, _, None) => Ok(None),
            (None, _, Some(value)) => Ok(Some(Node::leaf(Nibbles::new(), value))),
            (Some((slot, hash)), None, None) => {
                let only = load_node(self.stores.nodes(), &hash)?;
                Ok(Some(prepend(&Nibbles::single(slot), only, pending)?))
            }
            _ => Ok(Some(Node::branch(children, value))),
        }
    }

    /// Persist the pending records and move the root
    fn commit(&mut self, root: Option<Node>, mut pending: PendingNodes) -> Result<()> {
        let new_root = match root {
            Some(node) => {
                let hash = pending.stage(&node)?;
                NodeContainer::Resolved { hash, node }
            }
            None => NodeContainer::Empty,
        };

        if new_root.hash() == self.root.hash() {
            trace!("mapping unchanged");
            return Ok(());
        }

        let written = pending.batch.len();
        self.stores.nodes().write_batch(pending.batch)?;
        self.root = new_root;
        debug!(nodes = written, root = %self.root_hash(), "committed trie update");
        Ok(())
    }
}

/// Split a leaf or extension where its path diverges from `new_path`
fn split(
    pending: &mut PendingNodes,
    old_path: Nibbles,
    old: Tail,
    new_path: Nibbles,
    value: Hash,
) -> Result<Node> {
    let shared = old_path.common_prefix_length(&new_path);
    let mut children = [None; BRANCH_WIDTH];
    let mut branch_value = None;

    match (old, old_path.get(shared)) {
        (Tail::Value(old_value), None) => branch_value = Some(old_value),
        (Tail::Value(old_value), Some(slot)) => {
            let leaf = Node::leaf(old_path.slice_from(shared + 1), old_value);
            children[slot as usize] = Some(pending.stage(&leaf)?);
        }
        (Tail::Child(child), Some(slot)) => {
            let rest = old_path.slice_from(shared + 1);
            children[slot as usize] = Some(if rest.is_empty() {
                child
            } else {
                pending.stage(&Node::extension(rest, child))?
            });
        }
        (Tail::Child(_), None) => {
            return Err(Error::InvalidNodeShape(
                "split of an extension that matches the key".into(),
            ))
        }
    }

    match new_path.get(shared) {
        None => branch_value = Some(value),
        Some(slot) => {
            let leaf = Node::leaf(new_path.slice_from(shared + 1), value);
            children[slot as usize] = Some(pending.stage(&leaf)?);
        }
    }

    let branch = Node::branch(children, branch_value);
    if shared == 0 {
        return Ok(branch);
    }
    let child = pending.stage(&branch)?;
    Ok(Node::extension(old_path.slice(0, shared), child))
}

/// Put `prefix` in front of `node`, merging paths where possible
fn prepend(prefix: &Nibbles, node: Node, pending: &mut PendingNodes) -> Result<Node> {
    if prefix.is_empty() {
        return Ok(node);
    }
    Ok(match node {
        Node::Leaf { path, value } => Node::leaf(prefix.concat(&path), value),
        Node::Extension { path, child } => Node::extension(prefix.concat(&path), child),
        branch @ Node::Branch { .. } => Node::extension(prefix.clone(), pending.stage(&branch)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, PrefixIterator};
    use crate::trie::NodeKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn trie() -> MerkleTrie<MemoryStore> {
        MerkleTrie::with_stores(DataStores::in_memory())
    }

    fn value(trie: &MerkleTrie<MemoryStore>, key: &[u8]) -> Option<Vec<u8>> {
        trie.get(key).unwrap().0
    }

    fn root_kind(trie: &MerkleTrie<MemoryStore>) -> Option<NodeKind> {
        trie.root_node()
            .resolve(trie.stores().nodes())
            .unwrap()
            .map(|(_, node)| node.kind())
    }

    #[test]
    fn test_empty_tree() {
        let trie = trie();
        assert_eq!(trie.root_hash(), EMPTY_ROOT);
        assert!(trie.root_node().is_empty());
        let (found, stack) = trie.get(b"anything").unwrap();
        assert!(found.is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_put_get_single() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();

        assert_eq!(value(&trie, b"alice"), Some(b"100".to_vec()));
        assert_ne!(trie.root_hash(), EMPTY_ROOT);
        assert_eq!(root_kind(&trie), Some(NodeKind::Leaf));
        assert!(value(&trie, b"alic").is_none());
        assert!(value(&trie, b"alicex").is_none());
    }

    #[test]
    fn test_split_and_collapse_scenario() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        let h1 = trie.root_hash();

        trie.put(b"alicia", b"50").unwrap();
        assert_ne!(trie.root_hash(), h1);
        // "alic" is shared, then 'e' (0x65) vs 'i' (0x69) differ in the low nibble
        assert_eq!(root_kind(&trie), Some(NodeKind::Extension));
        assert_eq!(value(&trie, b"alice"), Some(b"100".to_vec()));
        assert_eq!(value(&trie, b"alicia"), Some(b"50".to_vec()));

        let (_, stack) = trie.get(b"alicia").unwrap();
        let kinds: Vec<NodeKind> = stack.iter().map(|e| e.node.kind()).collect();
        assert_eq!(kinds, vec![NodeKind::Extension, NodeKind::Branch, NodeKind::Leaf]);
        assert_eq!(stack.last().unwrap().matched.len(), 10);

        trie.delete(b"alice").unwrap();
        assert!(value(&trie, b"alice").is_none());
        assert_eq!(value(&trie, b"alicia"), Some(b"50".to_vec()));
        assert_eq!(root_kind(&trie), Some(NodeKind::Leaf));

        let mut fresh = super::tests::trie();
        fresh.put(b"alicia", b"50").unwrap();
        assert_eq!(trie.root_hash(), fresh.root_hash());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut trie = trie();
        trie.delete(b"ghost").unwrap();
        assert_eq!(trie.root_hash(), EMPTY_ROOT);

        trie.put(b"alice", b"100").unwrap();
        trie.put(b"bob", b"7").unwrap();
        let root = trie.root_hash();
        let nodes_before = trie.stores().nodes().len().unwrap();

        trie.delete(b"ghost").unwrap();
        trie.delete(b"ali").unwrap();
        trie.delete(b"alicex").unwrap();
        assert_eq!(trie.root_hash(), root);
        assert_eq!(trie.stores().nodes().len().unwrap(), nodes_before);
    }

    #[test]
    fn test_delete_last_key_empties_tree() {
        let mut trie = trie();
        trie.put(b"only", b"1").unwrap();
        trie.delete(b"only").unwrap();
        assert_eq!(trie.root_hash(), EMPTY_ROOT);
        assert!(value(&trie, b"only").is_none());
        assert_eq!(trie.stores().user().get(b"only").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_update_changes_root() {
        let mut trie = trie();
        trie.put(b"k", b"v1").unwrap();
        let h1 = trie.root_hash();

        trie.put(b"k", b"v1").unwrap();
        assert_eq!(trie.root_hash(), h1);

        trie.put(b"k", b"v2").unwrap();
        assert_ne!(trie.root_hash(), h1);
        assert_eq!(value(&trie, b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_key_prefix_of_another() {
        let mut trie = trie();
        trie.put(b"ab", b"short").unwrap();
        trie.put(b"abcd", b"long").unwrap();

        assert_eq!(value(&trie, b"ab"), Some(b"short".to_vec()));
        assert_eq!(value(&trie, b"abcd"), Some(b"long".to_vec()));
        assert!(value(&trie, b"abc").is_none());

        // Removing the branch value folds the tree back into one leaf
        trie.delete(b"ab").unwrap();
        assert_eq!(root_kind(&trie), Some(NodeKind::Leaf));
        assert_eq!(value(&trie, b"abcd"), Some(b"long".to_vec()));

        trie.put(b"ab", b"short").unwrap();
        trie.delete(b"abcd").unwrap();
        assert_eq!(root_kind(&trie), Some(NodeKind::Leaf));
        assert_eq!(value(&trie, b"ab"), Some(b"short".to_vec()));
    }

    #[test]
    fn test_empty_key() {
        let mut trie = trie();
        trie.put(b"", b"root value").unwrap();
        trie.put(b"x", b"1").unwrap();
        assert_eq!(value(&trie, b""), Some(b"root value".to_vec()));
        assert_eq!(value(&trie, b"x"), Some(b"1".to_vec()));

        trie.delete(b"").unwrap();
        assert!(value(&trie, b"").is_none());
        assert_eq!(value(&trie, b"x"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_extension_split_at_every_position() {
        // Keys sharing a long prefix force an extension; the third key
        // diverges inside it
        let mut trie = trie();
        trie.put(b"prefix-1", b"a").unwrap();
        trie.put(b"prefix-2", b"b").unwrap();
        trie.put(b"pre", b"c").unwrap();
        trie.put(b"q", b"d").unwrap();
        trie.put(b"prefiy", b"e").unwrap();

        for (k, v) in [
            (&b"prefix-1"[..], &b"a"[..]),
            (b"prefix-2", b"b"),
            (b"pre", b"c"),
            (b"q", b"d"),
            (b"prefiy", b"e"),
        ] {
            assert_eq!(value(&trie, k).as_deref(), Some(v), "key {:?}", k);
        }
    }

    #[test]
    fn test_insertion_order_independence() {
        let keys: Vec<Vec<u8>> = vec![
            b"do".to_vec(),
            b"dog".to_vec(),
            b"doge".to_vec(),
            b"horse".to_vec(),
            b"".to_vec(),
            vec![0x00],
            vec![0x0f, 0xff],
            vec![0xf0],
        ];

        let mut forward = trie();
        for k in &keys {
            forward.put(k, k).unwrap();
        }

        let mut backward = trie();
        for k in keys.iter().rev() {
            backward.put(k, k).unwrap();
        }

        assert_eq!(forward.root_hash(), backward.root_hash());
    }

    #[test]
    fn test_delete_restores_previous_root() {
        let mut trie = trie();
        trie.put(b"do", b"verb").unwrap();
        trie.put(b"dog", b"puppy").unwrap();
        let before = trie.root_hash();

        trie.put(b"doge", b"coin").unwrap();
        trie.put(b"horse", b"stallion").unwrap();
        trie.delete(b"doge").unwrap();
        trie.delete(b"horse").unwrap();

        assert_eq!(trie.root_hash(), before);
    }

    #[test]
    fn test_contains() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        assert!(trie.contains(b"alice").unwrap());
        assert!(!trie.contains(b"bob").unwrap());
    }

    #[test]
    fn test_missing_user_value() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        trie.stores().user().delete(b"alice").unwrap();
        assert!(matches!(trie.get(b"alice"), Err(Error::MissingValue(_))));
    }

    #[test]
    fn test_tampered_user_value() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        trie.stores().user().put(b"alice", b"999").unwrap();
        assert!(matches!(trie.get(b"alice"), Err(Error::ValueMismatch(_))));
    }

    #[test]
    fn test_missing_child_node() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        trie.put(b"bob", b"7").unwrap();

        // Drop every record except the root
        let root = trie.root_hash();
        let keys: Vec<Vec<u8>> = trie
            .stores()
            .nodes()
            .prefix_iterator(b"")
            .unwrap()
            .map(|(k, _)| k)
            .filter(|k| k.as_slice() != root.as_bytes())
            .collect();
        for k in keys {
            trie.stores().nodes().delete(&k).unwrap();
        }

        assert!(matches!(trie.get(b"alice"), Err(Error::MissingNode(_))));
    }

    #[test]
    fn test_from_root() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        trie.put(b"alicia", b"50").unwrap();
        let root = trie.root_hash();

        let MerkleTrie { stores, .. } = trie;
        let reloaded = MerkleTrie::from_root(stores, root).unwrap();
        assert_eq!(reloaded.root_hash(), root);
        assert_eq!(
            reloaded.get(b"alicia").unwrap().0,
            Some(b"50".to_vec())
        );
    }

    #[test]
    fn test_from_unknown_root() {
        let unknown = Hash::digest(b"no such root");
        assert!(matches!(
            MerkleTrie::from_root(DataStores::in_memory(), unknown),
            Err(Error::RootNotFound(h)) if h == unknown
        ));

        let empty = MerkleTrie::from_root(DataStores::in_memory(), EMPTY_ROOT).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_from_root_with_mismatched_record() {
        let stores = DataStores::in_memory();
        let node = Node::leaf(Nibbles::from_bytes(b"k"), value_ref(b"v"));
        let bogus = Hash::digest(b"claimed");
        stores
            .nodes()
            .put(bogus.as_bytes(), &node.encode().unwrap())
            .unwrap();

        assert!(matches!(
            MerkleTrie::from_root(stores, bogus),
            Err(Error::CorruptEncoding(_))
        ));
    }

    #[test]
    fn test_old_roots_stay_readable() {
        let mut trie = trie();
        trie.put(b"alice", b"100").unwrap();
        let old_root = trie.root_hash();
        trie.put(b"bob", b"7").unwrap();
        trie.delete(b"alice").unwrap();

        // Old node records are never removed
        let MerkleTrie { stores, .. } = trie;
        let old = MerkleTrie::from_root(stores, old_root).unwrap();
        assert!(old.contains(b"alice").unwrap());
        assert!(!old.contains(b"bob").unwrap());
        assert_eq!(old.get(b"alice").unwrap().0, Some(b"100".to_vec()));
        assert_eq!(
            old.list_prefix(b"").unwrap(),
            vec![(b"alice".to_vec(), b"100".to_vec())]
        );
    }

    /// Memory backend whose batches can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl KvBackend for FlakyStore {
        fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn write_batch(&self, batch: WriteBatch) -> std::result::Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.write_batch(batch)
        }

        fn prefix_iterator(
            &self,
            prefix: &[u8],
        ) -> std::result::Result<PrefixIterator<'_>, StoreError> {
            self.inner.prefix_iterator(prefix)
        }

        fn len(&self) -> std::result::Result<usize, StoreError> {
            self.inner.len()
        }

        fn close(&self) -> std::result::Result<(), StoreError> {
            self.inner.close()
        }
    }

    #[test]
    fn test_failed_node_write_keeps_previous_value() {
        let mut trie = MerkleTrie::with_stores(DataStores::new(
            FlakyStore::default(),
            FlakyStore::default(),
        ));
        trie.put(b"alice", b"100").unwrap();
        let root = trie.root_hash();

        trie.stores().nodes().fail_writes.store(true, Ordering::SeqCst);
        assert!(trie.put(b"alice", b"999").is_err());
        assert!(trie.put(b"bob", b"7").is_err());

        assert_eq!(trie.root_hash(), root);
        assert_eq!(trie.get(b"alice").unwrap().0, Some(b"100".to_vec()));
        assert!(trie.stores().user().get(b"bob").unwrap().is_none());

        trie.stores().nodes().fail_writes.store(false, Ordering::SeqCst);
        trie.put(b"bob", b"7").unwrap();
        assert_eq!(trie.get(b"bob").unwrap().0, Some(b"7".to_vec()));
    }

    #[test]
    fn test_close_data_stores_twice() {
        let trie = trie();
        trie.close_data_stores().unwrap();
        trie.close_data_stores().unwrap();
        assert!(trie.get(b"k").is_ok());

        let mut trie = self::trie();
        trie.put(b"k", b"v").unwrap();
        trie.close_data_stores().unwrap();
        assert!(matches!(trie.get(b"k"), Err(Error::Store(_))));
    }
}
