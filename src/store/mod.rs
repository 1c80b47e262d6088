//! Embedded ordered key-value stores
//!
//! The trie keeps two independent stores: the user store (caller key to
//! caller value) and the node store (node hash to encoded node record).
//! Both sit behind [`KvBackend`] so the engine can run against the on-disk
//! [`FileStore`] or the in-memory [`MemoryStore`].

mod data_stores;
mod file_store;
mod memory_store;
mod record;

pub use data_stores::DataStores;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use record::{Record, RecordOp};

use crate::error::StoreError;

/// Iterator over `(key, value)` pairs in key order
pub type PrefixIterator<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// An ordered key-value store
pub trait KvBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    /// Delete a key (deleting an absent key is not an error)
    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a batch of writes as one unit
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order
    fn prefix_iterator(&self, prefix: &[u8]) -> Result<PrefixIterator<'_>, StoreError>;

    /// Number of live keys
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Make all written data durable
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Release the store. Closing an already closed store succeeds.
    fn close(&self) -> Result<(), StoreError>;
}

/// A batch of write operations
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub operations: Vec<BatchOp>,
}

/// A single operation in a write batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            operations: Vec::new(),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.operations.push(BatchOp::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}
