//! Read-only access to a synced trie.
//!
//! [`TrieReader`] opens a trie at a root hash against a [`NodeStore`] and
//! supports key lookups and a full consistency walk. Every node touched is
//! re-verified against its hash, so corruption and missing subtrees surface
//! as errors rather than wrong answers.

use crate::store::NodeStore;
use thiserror::Error;
use triesync_core::{
    hasher, nibbles,
    node::{ChildRef, DecodeError, Node},
    NodeBytes, NodeHash, EMPTY_ROOT,
};

/// A failure to resolve or validate a trie node during reads.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A referenced node is absent from the store.
    #[error("missing trie node {}", hex::encode(.0))]
    MissingNode(NodeHash),
    /// A stored node no longer matches its hash.
    #[error("trie node {} does not match its hash", hex::encode(.0))]
    HashMismatch(NodeHash),
    /// A stored node (or one of its inline children) does not parse.
    #[error("corrupt trie node {}: {source}", hex::encode(.hash))]
    Corrupt {
        /// The stored node the bytes belong to.
        hash: NodeHash,
        /// The codec failure.
        source: DecodeError,
    },
}

/// A read-only view of a trie rooted at a fixed hash.
pub struct TrieReader<'a, S> {
    store: &'a S,
    root: NodeHash,
}

impl<'a, S: NodeStore> TrieReader<'a, S> {
    /// Open the trie at `root`. Fails if the root node is absent; the
    /// empty root is always openable.
    pub fn open(store: &'a S, root: NodeHash) -> Result<Self, ReadError> {
        if root != EMPTY_ROOT && store.get(&root).is_none() {
            return Err(ReadError::MissingNode(root));
        }
        Ok(TrieReader { store, root })
    }

    /// Look up the value stored at `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<NodeBytes>, ReadError> {
        if self.root == EMPTY_ROOT {
            return Ok(None);
        }
        let nibbles = nibbles::unpack(key);
        let mut path: &[u8] = &nibbles;
        // The hash of the node currently holding the traversal; inline
        // children stay attributed to it.
        let mut owner = self.root;
        let mut node = self.resolve(&self.root)?;
        loop {
            match node {
                Node::Leaf {
                    path: node_path,
                    value,
                } => {
                    return Ok((node_path == path).then_some(value));
                }
                Node::Extension {
                    path: node_path,
                    child,
                } => {
                    let Some(rest) = path.strip_prefix(&node_path[..]) else {
                        return Ok(None);
                    };
                    path = rest;
                    (node, owner) = self.deref_child(owner, child)?;
                }
                Node::Branch {
                    mut children,
                    value,
                } => match path.split_first() {
                    None => return Ok(value),
                    Some((&nibble, rest)) => {
                        let Some(child) = children[nibble as usize].take() else {
                            return Ok(None);
                        };
                        path = rest;
                        (node, owner) = self.deref_child(owner, child)?;
                    }
                },
            }
        }
    }

    /// Walk every node reachable from the root, verifying hashes and
    /// decodability. Succeeds only if the stored trie is complete.
    pub fn check_consistency(&self) -> Result<(), ReadError> {
        if self.root == EMPTY_ROOT {
            return Ok(());
        }
        let mut stack = vec![(self.root, ChildRef::Hash(self.root))];
        while let Some((owner, child)) = stack.pop() {
            let (node, node_hash) = match child {
                ChildRef::Hash(hash) => (self.resolve(&hash)?, hash),
                ChildRef::Inline(raw) => (
                    Node::decode(&raw).map_err(|source| ReadError::Corrupt {
                        hash: owner,
                        source,
                    })?,
                    owner,
                ),
            };
            for child in node.children() {
                stack.push((node_hash, child.clone()));
            }
        }
        Ok(())
    }

    fn deref_child(&self, owner: NodeHash, child: ChildRef) -> Result<(Node, NodeHash), ReadError> {
        match child {
            ChildRef::Hash(hash) => Ok((self.resolve(&hash)?, hash)),
            ChildRef::Inline(raw) => {
                let node = Node::decode(&raw).map_err(|source| ReadError::Corrupt {
                    hash: owner,
                    source,
                })?;
                Ok((node, owner))
            }
        }
    }

    fn resolve(&self, hash: &NodeHash) -> Result<Node, ReadError> {
        let Some(bytes) = self.store.get(hash) else {
            return Err(ReadError::MissingNode(*hash));
        };
        if !hasher::verify(hash, &bytes) {
            return Err(ReadError::HashMismatch(*hash));
        }
        Node::decode(&bytes).map_err(|source| ReadError::Corrupt {
            hash: *hash,
            source,
        })
    }
}
