//! Shared test harness: a minimal trie builder producing hash-keyed RLP
//! nodes in a [`MemoryStore`], plus content/consistency checks over a
//! synced destination.

use std::collections::HashMap;
use triesync::{
    hasher, nibbles,
    node::{ChildRef, Node},
    MemoryStore, NodeHash, NodeStore, ReadError, TrieReader, EMPTY_ROOT,
};

/// An in-memory trie node under construction.
enum BuildNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Box<BuildNode>,
    },
    Branch {
        children: Box<[Option<BuildNode>; 16]>,
        value: Option<Vec<u8>>,
    },
}

fn none_children() -> Box<[Option<BuildNode>; 16]> {
    Box::new(std::array::from_fn(|_| None))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn insert(slot: Option<BuildNode>, path: &[u8], value: Vec<u8>) -> BuildNode {
    match slot {
        None => BuildNode::Leaf {
            path: path.to_vec(),
            value,
        },
        Some(BuildNode::Leaf {
            path: old_path,
            value: old_value,
        }) => {
            if old_path == path {
                return BuildNode::Leaf {
                    path: old_path,
                    value,
                };
            }
            let common = common_prefix(&old_path, path);
            let mut children = none_children();
            let mut branch_value = None;
            match old_path[common..].split_first() {
                None => branch_value = Some(old_value),
                Some((&nibble, rest)) => {
                    children[nibble as usize] = Some(BuildNode::Leaf {
                        path: rest.to_vec(),
                        value: old_value,
                    });
                }
            }
            match path[common..].split_first() {
                None => branch_value = Some(value),
                Some((&nibble, rest)) => {
                    children[nibble as usize] = Some(BuildNode::Leaf {
                        path: rest.to_vec(),
                        value,
                    });
                }
            }
            let branch = BuildNode::Branch {
                children,
                value: branch_value,
            };
            if common == 0 {
                branch
            } else {
                BuildNode::Extension {
                    path: path[..common].to_vec(),
                    child: Box::new(branch),
                }
            }
        }
        Some(BuildNode::Extension {
            path: ext_path,
            child,
        }) => {
            let common = common_prefix(&ext_path, path);
            if common == ext_path.len() {
                let child = insert(Some(*child), &path[common..], value);
                return BuildNode::Extension {
                    path: ext_path,
                    child: Box::new(child),
                };
            }
            // Split the extension at the divergence point.
            let mut children = none_children();
            let below = if common + 1 == ext_path.len() {
                *child
            } else {
                BuildNode::Extension {
                    path: ext_path[common + 1..].to_vec(),
                    child,
                }
            };
            children[ext_path[common] as usize] = Some(below);
            let branch = BuildNode::Branch {
                children,
                value: None,
            };
            let branch = insert(Some(branch), &path[common..], value);
            if common == 0 {
                branch
            } else {
                BuildNode::Extension {
                    path: ext_path[..common].to_vec(),
                    child: Box::new(branch),
                }
            }
        }
        Some(BuildNode::Branch {
            mut children,
            value: branch_value,
        }) => match path.split_first() {
            None => BuildNode::Branch {
                children,
                value: Some(value),
            },
            Some((&nibble, rest)) => {
                let slot = children[nibble as usize].take();
                children[nibble as usize] = Some(insert(slot, rest, value));
                BuildNode::Branch {
                    children,
                    value: branch_value,
                }
            }
        },
    }
}

/// Encode `node`, committing any hash-referenced descendants to `store`.
fn encode_node(node: &BuildNode, store: &MemoryStore) -> Vec<u8> {
    match node {
        BuildNode::Leaf { path, value } => Node::Leaf {
            path: path.clone(),
            value: value.clone(),
        }
        .encode(),
        BuildNode::Extension { path, child } => Node::Extension {
            path: path.clone(),
            child: commit_node(child, store),
        }
        .encode(),
        BuildNode::Branch { children, value } => {
            let mut slots: [Option<ChildRef>; 16] = std::array::from_fn(|_| None);
            for (slot, child) in slots.iter_mut().zip(children.iter()) {
                if let Some(child) = child {
                    *slot = Some(commit_node(child, store));
                }
            }
            Node::Branch {
                children: slots,
                value: value.clone(),
            }
            .encode()
        }
    }
}

fn commit_node(node: &BuildNode, store: &MemoryStore) -> ChildRef {
    let encoded = encode_node(node, store);
    if encoded.len() < 32 {
        ChildRef::Inline(encoded)
    } else {
        let hash = hasher::keccak256(&encoded);
        store.put(hash, encoded);
        ChildRef::Hash(hash)
    }
}

/// A trie under construction; committed to a store as content-addressed
/// nodes once fully populated.
pub struct TrieBuilder {
    root: Option<BuildNode>,
}

impl TrieBuilder {
    pub fn new() -> Self {
        TrieBuilder { root: None }
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        let path = nibbles::unpack(key);
        self.root = Some(insert(self.root.take(), &path, value.to_vec()));
    }

    /// Commit all nodes to `store` and return the root hash. The root node
    /// is always stored by hash, however small its encoding.
    pub fn commit(&self, store: &MemoryStore) -> NodeHash {
        let Some(root) = &self.root else {
            return EMPTY_ROOT;
        };
        let encoded = encode_node(root, store);
        let hash = hasher::keccak256(&encoded);
        store.put(hash, encoded);
        store.batch_commit().unwrap();
        hash
    }
}

/// Left-pad to the 32-byte key width the sync corpus uses.
pub fn pad32(bytes: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[32 - bytes.len()..].copy_from_slice(bytes);
    key
}

/// Build the reference source trie: a couple hundred accounts fanned out
/// under a dozen prefixes, with enough overlap to share subtrees.
pub fn make_test_trie() -> (MemoryStore, NodeHash, HashMap<Vec<u8>, Vec<u8>>) {
    let store = MemoryStore::new();
    let mut trie = TrieBuilder::new();
    let mut content = HashMap::new();
    for i in 0..255u8 {
        for (key, value) in [(pad32(&[1, i]), vec![i]), (pad32(&[2, i]), vec![i])] {
            trie.insert(&key, &value);
            content.insert(key.to_vec(), value);
        }
        for j in 3..13u8 {
            let key = pad32(&[j, i]);
            let value = vec![j, i];
            trie.insert(&key, &value);
            content.insert(key.to_vec(), value);
        }
    }
    let root = trie.commit(&store);
    (store, root, content)
}

/// Open the trie at `root` and assert it is complete and holds exactly the
/// expected values for `content`'s keys.
pub fn check_trie_contents(
    store: &MemoryStore,
    root: NodeHash,
    content: &HashMap<Vec<u8>, Vec<u8>>,
) {
    let reader = TrieReader::open(store, root).expect("destination trie must open");
    reader
        .check_consistency()
        .expect("destination trie must be consistent");
    for (key, value) in content {
        assert_eq!(
            reader.get(key).expect("lookup must not error").as_deref(),
            Some(&value[..]),
            "content mismatch for key {}",
            hex::encode(key),
        );
    }
}

/// Consistency check that tolerates a wholly absent root, mirroring
/// subtrees whose sync has not started yet.
pub fn check_consistency(store: &MemoryStore, root: NodeHash) -> Result<(), ReadError> {
    match TrieReader::open(store, root) {
        Ok(reader) => reader.check_consistency(),
        Err(_) => Ok(()),
    }
}
