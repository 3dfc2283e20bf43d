//! The trie sync scheduler.
//!
//! [`TrieSync`] reconstructs a Merkle-Patricia trie on a destination store
//! given only its root hash and on-demand access to node bytes from remote
//! sources. The caller drives a loop: [`missing`](TrieSync::missing) yields
//! hashes to fetch, [`process`](TrieSync::process) accepts fetched bytes —
//! in any order and any batching — and schedules the children they
//! reference, and [`commit`](TrieSync::commit) flushes fully reconstructed
//! subtrees to the store.
//!
//! Nodes reach the store bottom-up: a node is written only once every
//! descendant is written or sits earlier in the same batch, so the store
//! always holds a prefix-closed set of subtrees and the root lands last.
//! Shared subtrees are requested once no matter how many parents reference
//! them.
//!
//! The scheduler is single-threaded cooperative. All state changes happen
//! inside `missing`, `process`, and `commit`; the caller fans fetches out
//! to any number of workers and funnels responses back through a single
//! `process` call site.

use crate::store::NodeStore;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use triesync_core::{
    hasher,
    node::{ChildRef, DecodeError, Node},
    NodeBytes, NodeHash, EMPTY_ROOT,
};

/// Callback observing every verified `(hash, bytes)` pair, e.g. to feed a
/// key-preimage index. Invoked after verification and before the node
/// enters the commit batch. Must not fail and must not call back into the
/// scheduler.
pub type PreimageHook = Box<dyn FnMut(&NodeHash, &[u8]) + Send>;

/// A fetched node delivered to [`TrieSync::process`].
pub struct SyncResult {
    /// The hash the bytes were fetched for.
    pub hash: NodeHash,
    /// The node encoding.
    pub data: NodeBytes,
}

/// A failure while processing results or committing the batch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Delivered bytes do not hash to the hash they were delivered for.
    #[error("node data hashes to {}, expected {}", hex::encode(.have), hex::encode(.want))]
    HashMismatch {
        /// The hash the data was delivered under.
        want: NodeHash,
        /// What the data actually hashes to.
        have: NodeHash,
    },
    /// Delivered bytes verified but do not parse as a trie node.
    #[error("undecodable node {}: {source}", hex::encode(.hash))]
    Decode {
        /// The node the bytes were delivered for.
        hash: NodeHash,
        /// The codec failure.
        source: DecodeError,
    },
    /// The destination store failed to flush the batch.
    #[error("store commit failed: {0}")]
    Store(anyhow::Error),
}

/// An error produced while applying a slice of results. Entries before
/// `index` were applied; the offending entry and everything after it were
/// not.
#[derive(Debug, Error)]
#[error("result #{index}: {source}")]
pub struct ProcessError {
    /// Position of the offending result in the processed slice.
    pub index: usize,
    /// What was wrong with it.
    #[source]
    pub source: SyncError,
}

/// Reconstruction state for a single outstanding node.
struct Request {
    /// Distance from the sync root, for scheduling priority. Paths through
    /// multiple parents keep the shallowest value.
    depth: u16,
    /// Queue insertion sequence; breaks depth ties first-come-first-out.
    seq: u64,
    /// Hashes of the nodes waiting on this one.
    parents: HashSet<NodeHash>,
    /// The verified encoding, once received.
    data: Option<NodeBytes>,
    /// Distinct children not yet in the store or the commit batch.
    missing_children: u32,
}

/// Completed nodes awaiting flush. Insertion order is reverse-topological:
/// a node is inserted only after all of its descendants.
#[derive(Default)]
struct Membatch {
    order: Vec<(NodeHash, NodeBytes)>,
    index: HashSet<NodeHash>,
}

impl Membatch {
    fn contains(&self, hash: &NodeHash) -> bool {
        self.index.contains(hash)
    }

    fn insert(&mut self, hash: NodeHash, data: NodeBytes) {
        self.index.insert(hash);
        self.order.push((hash, data));
    }
}

/// The trie synchronization scheduler. See the module docs for the drive
/// loop and the ordering guarantees.
pub struct TrieSync<S> {
    store: S,
    /// Outstanding nodes by hash. At most one entry per hash for the
    /// lifetime of the sync, however many parents reference it.
    pending: HashMap<NodeHash, Request>,
    /// Fetchable hashes keyed by `(depth, seq)`: breadth-first, stable.
    queue: BTreeMap<(u16, u64), NodeHash>,
    next_seq: u64,
    membatch: Membatch,
    preimage_hook: Option<PreimageHook>,
}

impl<S: NodeStore> TrieSync<S> {
    /// Create a scheduler targeting `root` on top of `store`.
    ///
    /// If the root is the empty-trie root or already present in the store,
    /// the sync starts complete: [`pending_count`](Self::pending_count) is
    /// zero and [`missing`](Self::missing) yields nothing.
    pub fn new(root: NodeHash, store: S, preimage_hook: Option<PreimageHook>) -> Self {
        let mut sync = TrieSync {
            store,
            pending: HashMap::new(),
            queue: BTreeMap::new(),
            next_seq: 0,
            membatch: Membatch::default(),
            preimage_hook,
        };
        if root != EMPTY_ROOT && sync.store.get(&root).is_none() {
            sync.schedule(root, 0, None);
        }
        sync
    }

    /// Number of nodes still being reconstructed. Zero means the sync is
    /// complete up to a final [`commit`](Self::commit).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Up to `max` hashes needing retrieval, shallowest first, depth ties
    /// in insertion order. `max == 0` returns everything currently
    /// fetchable.
    ///
    /// Non-consuming: a hash stays eligible until its bytes are processed,
    /// so timed-out fetches are retried by simply asking again. Callers
    /// that must not fetch twice de-duplicate across calls themselves.
    pub fn missing(&self, max: usize) -> Vec<NodeHash> {
        let limit = if max == 0 { usize::MAX } else { max };
        self.queue.values().copied().take(limit).collect()
    }

    /// Apply fetched results in order.
    ///
    /// Each result is verified against its hash, decoded, and its children
    /// scheduled; completed nodes cascade into the commit batch. The first
    /// mismatched or undecodable result aborts the call with its position;
    /// earlier entries remain applied and the offending hash stays
    /// fetchable. Verified results for hashes that are unknown or already
    /// satisfied are accepted as no-ops, since racing workers may deliver
    /// duplicates.
    pub fn process(&mut self, results: Vec<SyncResult>) -> Result<usize, ProcessError> {
        let total = results.len();
        for (index, result) in results.into_iter().enumerate() {
            self.process_one(result)
                .map_err(|source| ProcessError { index, source })?;
        }
        Ok(total)
    }

    /// Flush every completed node to `store` in one atomic batch, children
    /// before parents, and return how many were written.
    ///
    /// On failure the batch is retained in memory and the call may be
    /// retried; re-issued writes are idempotent because the keyspace is
    /// content-addressed.
    pub fn commit(&mut self, store: &S) -> Result<usize, SyncError> {
        for (hash, data) in &self.membatch.order {
            store.put(*hash, data.clone());
        }
        store.batch_commit().map_err(SyncError::Store)?;
        let written = self.membatch.order.len();
        self.membatch = Membatch::default();
        Ok(written)
    }

    fn process_one(&mut self, result: SyncResult) -> Result<(), SyncError> {
        let SyncResult { hash, data } = result;
        if !hasher::verify(&hash, &data) {
            return Err(SyncError::HashMismatch {
                want: hash,
                have: hasher::keccak256(&data),
            });
        }
        let depth = match self.pending.get(&hash) {
            Some(request) if request.data.is_none() => request.depth,
            // Unknown or already-satisfied hash: a duplicate delivery or a
            // worker race, not an error.
            _ => return Ok(()),
        };
        let node = Node::decode(&data).map_err(|source| SyncError::Decode { hash, source })?;
        if let Some(hook) = &mut self.preimage_hook {
            hook(&hash, &data);
        }

        // Gather the hash-referenced children before touching any state, so
        // a malformed inline child rejects the node without side effects.
        let mut children = Vec::new();
        collect_child_hashes(&node, depth, &mut children)
            .map_err(|source| SyncError::Decode { hash, source })?;

        let mut missing = 0u32;
        let mut distinct = HashSet::new();
        for (child, child_depth) in children {
            if !distinct.insert(child) {
                continue;
            }
            if self.membatch.contains(&child) || self.store.get(&child).is_some() {
                continue;
            }
            self.schedule(child, child_depth, Some(hash));
            missing += 1;
        }

        if let Some(request) = self.pending.get_mut(&hash) {
            self.queue.remove(&(request.depth, request.seq));
            request.data = Some(data);
            request.missing_children = missing;
        }
        if missing == 0 {
            self.finalize(hash);
        }
        Ok(())
    }

    /// Register `hash` as needed at `depth`, uniting with an existing entry
    /// if the node is already tracked.
    fn schedule(&mut self, hash: NodeHash, depth: u16, parent: Option<NodeHash>) {
        if let Some(request) = self.pending.get_mut(&hash) {
            if let Some(parent) = parent {
                request.parents.insert(parent);
            }
            // Keep the shallowest depth any path gives this node; re-key
            // the fetch queue if it is still waiting to be fetched.
            if depth < request.depth {
                if request.data.is_none() {
                    self.queue.remove(&(request.depth, request.seq));
                    self.queue.insert((depth, request.seq), hash);
                }
                request.depth = depth;
            }
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut parents = HashSet::new();
        if let Some(parent) = parent {
            parents.insert(parent);
        }
        self.pending.insert(
            hash,
            Request {
                depth,
                seq,
                parents,
                data: None,
                missing_children: 0,
            },
        );
        self.queue.insert((depth, seq), hash);
    }

    /// Move a fully reconstructed node into the commit batch and unblock
    /// its parents, cascading through any that reach zero missing children.
    fn finalize(&mut self, hash: NodeHash) {
        let mut ready = vec![hash];
        while let Some(hash) = ready.pop() {
            let Some(request) = self.pending.remove(&hash) else {
                continue;
            };
            let Some(data) = request.data else { continue };
            self.membatch.insert(hash, data);
            for parent in request.parents {
                if let Some(parent_request) = self.pending.get_mut(&parent) {
                    parent_request.missing_children -= 1;
                    if parent_request.missing_children == 0 && parent_request.data.is_some() {
                        ready.push(parent);
                    }
                }
            }
        }
    }
}

/// Collect the hash-referenced children of `node`, recursing through inline
/// children so that their references are charged to the enclosing
/// separately-stored node.
fn collect_child_hashes(
    node: &Node,
    depth: u16,
    out: &mut Vec<(NodeHash, u16)>,
) -> Result<(), DecodeError> {
    let step = match node {
        Node::Extension { path, .. } | Node::Leaf { path, .. } => path.len() as u16,
        Node::Branch { .. } => 1,
    };
    let child_depth = depth.saturating_add(step);
    for child in node.children() {
        match child {
            ChildRef::Hash(hash) => out.push((*hash, child_depth)),
            ChildRef::Inline(raw) => {
                let inline = Node::decode(raw)?;
                collect_child_hashes(&inline, child_depth, out)?;
            }
        }
    }
    Ok(())
}
