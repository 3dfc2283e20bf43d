//! Keccak-256 node hashing.

use crate::NodeHash;
use sha3::{Digest, Keccak256};

/// Hash a node encoding.
pub fn keccak256(bytes: &[u8]) -> NodeHash {
    Keccak256::digest(bytes).into()
}

/// Whether `bytes` is the preimage of `hash`.
pub fn verify(hash: &NodeHash, bytes: &[u8]) -> bool {
    keccak256(bytes) == *hash
}
