//! The user store and node store, owned and released together

use super::{FileStore, KvBackend, MemoryStore};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::Result;
use std::path::Path;
use tracing::warn;

/// Both backing stores of a trie
pub struct DataStores<B: KvBackend> {
    user: B,
    nodes: B,
}

impl<B: KvBackend> DataStores<B> {
    pub fn new(user: B, nodes: B) -> Self {
        DataStores { user, nodes }
    }

    /// Caller key to caller value
    pub fn user(&self) -> &B {
        &self.user
    }

    /// Node hash to encoded node record
    pub fn nodes(&self) -> &B {
        &self.nodes
    }

    /// Flush both stores
    pub fn flush(&self) -> std::result::Result<(), StoreError> {
        self.nodes.flush()?;
        self.user.flush()
    }

    /// Close both stores
    ///
    /// The node store is closed first. If it fails the user store is still
    /// closed and the first error is returned.
    pub fn close(&self) -> std::result::Result<(), StoreError> {
        let nodes = self.nodes.close();
        if let Err(e) = &nodes {
            warn!(error = %e, "failed to close node store");
        }

        let user = self.user.close();
        if let Err(e) = &user {
            warn!(error = %e, "failed to close user store");
        }

        nodes.and(user)
    }
}

impl DataStores<FileStore> {
    /// Open (or create) both stores on disk
    pub fn open(user_path: impl AsRef<Path>, node_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(
            user_path,
            StoreConfig::default(),
            node_path,
            StoreConfig::default(),
        )
    }

    pub fn open_with_config(
        user_path: impl AsRef<Path>,
        user_config: StoreConfig,
        node_path: impl AsRef<Path>,
        node_config: StoreConfig,
    ) -> Result<Self> {
        let user = FileStore::open_with_config(user_path, user_config)?;
        let nodes = FileStore::open_with_config(node_path, node_config)?;
        Ok(DataStores { user, nodes })
    }
}

impl DataStores<MemoryStore> {
    /// Two fresh in-memory stores
    pub fn in_memory() -> Self {
        DataStores::new(MemoryStore::new(), MemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PrefixIterator;
    use crate::store::WriteBatch;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Backend whose close always fails, counting attempts
    #[derive(Default)]
    struct FailingClose {
        closes: AtomicUsize,
    }

    impl KvBackend for FailingClose {
        fn get(&self, _key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn write_batch(&self, _batch: WriteBatch) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn prefix_iterator(
            &self,
            _prefix: &[u8],
        ) -> std::result::Result<PrefixIterator<'_>, StoreError> {
            Ok(Box::new(std::iter::empty()))
        }

        fn len(&self) -> std::result::Result<usize, StoreError> {
            Ok(0)
        }

        fn close(&self) -> std::result::Result<(), StoreError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::InvalidFile("close failed".into()))
        }
    }

    #[test]
    fn test_close_attempts_both_stores() {
        let stores = DataStores::new(FailingClose::default(), FailingClose::default());
        assert!(stores.close().is_err());
        assert_eq!(stores.user().closes.load(Ordering::SeqCst), 1);
        assert_eq!(stores.nodes().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_and_close_twice() {
        let dir = tempdir().unwrap();
        let stores = DataStores::open(dir.path().join("user"), dir.path().join("nodes")).unwrap();
        stores.user().put(b"k", b"v").unwrap();

        stores.close().unwrap();
        stores.close().unwrap();
        assert!(stores.user().is_closed());
        assert!(stores.nodes().is_closed());
    }
}
