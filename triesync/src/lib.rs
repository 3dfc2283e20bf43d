#![warn(missing_docs)]

//! Merkle-Patricia trie synchronization.
//!
//! Given a trie's root hash and on-demand access to node bytes from remote
//! sources, [`TrieSync`] reconstructs the trie on a local [`NodeStore`] one
//! verified node at a time. Responses may arrive in any order and batching;
//! duplicate work across shared subtrees is elided; an incomplete subtree
//! is never persisted, so the store always holds a consistent prefix of the
//! trie and the root is written last.
//!
//! The scheduler is single-threaded cooperative: the caller fans
//! [`TrieSync::missing`] out to any number of fetchers and funnels the
//! responses back through [`TrieSync::process`] and [`TrieSync::commit`].
//! After the sync, [`TrieReader`] serves lookups and consistency checks
//! from the store.

pub use triesync_core::{hasher, nibbles, node, NodeBytes, NodeHash, EMPTY_ROOT};

pub use reader::{ReadError, TrieReader};
pub use store::{MemoryStore, NodeStore};
pub use sync::{PreimageHook, ProcessError, SyncError, SyncResult, TrieSync};

mod reader;
mod store;
mod sync;
