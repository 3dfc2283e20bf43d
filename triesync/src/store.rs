//! The destination store for reconstructed trie nodes.
//!
//! The keyspace is content-addressed: the raw 32-byte node hash maps to the
//! node encoding, with no prefixes and no metadata. Writes are buffered and
//! become visible atomically at [`NodeStore::batch_commit`].

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use triesync_core::{NodeBytes, NodeHash};

/// A durable key-value destination for reconstructed nodes.
///
/// The sync engine requires that a [`put`](NodeStore::put) followed by
/// [`batch_commit`](NodeStore::batch_commit) is durable and visible to
/// subsequent [`get`](NodeStore::get)s. Visibility of writes that have not
/// been flushed is unspecified.
pub trait NodeStore {
    /// Read a node's bytes, if present.
    fn get(&self, key: &NodeHash) -> Option<NodeBytes>;

    /// Buffer a write.
    fn put(&self, key: NodeHash, value: NodeBytes);

    /// Remove a committed entry. The sync engine never deletes; this exists
    /// for consistency checks that punch holes in a store.
    fn delete(&self, key: &NodeHash);

    /// Atomically flush all writes buffered since the last call.
    fn batch_commit(&self) -> anyhow::Result<()>;
}

/// An in-memory [`NodeStore`].
///
/// This is a lightweight handle and can be cloned cheaply; clones share the
/// same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    committed: HashMap<NodeHash, NodeBytes>,
    staged: Vec<(NodeHash, NodeBytes)>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.inner.read().committed.len()
    }

    /// Whether the store holds no committed entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().committed.is_empty()
    }
}

impl NodeStore for MemoryStore {
    fn get(&self, key: &NodeHash) -> Option<NodeBytes> {
        self.inner.read().committed.get(key).cloned()
    }

    fn put(&self, key: NodeHash, value: NodeBytes) {
        self.inner.write().staged.push((key, value));
    }

    fn delete(&self, key: &NodeHash) {
        self.inner.write().committed.remove(key);
    }

    fn batch_commit(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        let staged = std::mem::take(&mut inner.staged);
        for (key, value) in staged {
            inner.committed.insert(key, value);
        }
        Ok(())
    }
}
