//! Diff between two roots of the same node store

use crate::model::Hash;
use crate::store::KvBackend;
use crate::trie::MerkleTrie;
use crate::Result;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

/// A key whose value reference differs between two roots
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DiffEntry {
    Added {
        #[serde(with = "hex::serde")]
        key: Vec<u8>,
        #[serde(serialize_with = "as_hex")]
        new_ref: Hash,
    },
    Removed {
        #[serde(with = "hex::serde")]
        key: Vec<u8>,
        #[serde(serialize_with = "as_hex")]
        old_ref: Hash,
    },
    Modified {
        #[serde(with = "hex::serde")]
        key: Vec<u8>,
        #[serde(serialize_with = "as_hex")]
        old_ref: Hash,
        #[serde(serialize_with = "as_hex")]
        new_ref: Hash,
    },
}

fn as_hex<S: Serializer>(hash: &Hash, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hash.to_hex())
}

impl DiffEntry {
    pub fn key(&self) -> &[u8] {
        match self {
            DiffEntry::Added { key, .. } => key,
            DiffEntry::Removed { key, .. } => key,
            DiffEntry::Modified { key, .. } => key,
        }
    }
}

/// Changes between two roots, sorted by key
#[derive(Clone, Debug, Default, Serialize)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn new(entries: Vec<DiffEntry>) -> Self {
        Diff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Added { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed { .. }))
            .count()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .count()
    }
}

/// Compare the entries under `old_root` and `new_root`
///
/// Both roots must be stored in `trie`'s node store. Only value references
/// are compared; old values are not read back from the user store, which
/// only holds the latest value for each key.
pub fn diff_roots<B: KvBackend>(
    trie: &MerkleTrie<B>,
    old_root: Hash,
    new_root: Hash,
) -> Result<Diff> {
    if old_root == new_root {
        return Ok(Diff::default());
    }

    let old_entries = trie.value_refs_at(old_root)?;
    let new_entries = trie.value_refs_at(new_root)?;

    let keys: BTreeSet<&Vec<u8>> = old_entries.keys().chain(new_entries.keys()).collect();
    let mut entries = Vec::new();

    for key in keys {
        match (old_entries.get(key), new_entries.get(key)) {
            (None, Some(&new_ref)) => entries.push(DiffEntry::Added {
                key: key.clone(),
                new_ref,
            }),
            (Some(&old_ref), None) => entries.push(DiffEntry::Removed {
                key: key.clone(),
                old_ref,
            }),
            (Some(&old_ref), Some(&new_ref)) if old_ref != new_ref => {
                entries.push(DiffEntry::Modified {
                    key: key.clone(),
                    old_ref,
                    new_ref,
                })
            }
            _ => {}
        }
    }

    Ok(Diff::new(entries))
}
