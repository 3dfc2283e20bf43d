#![warn(missing_docs)]

//! Node schema and codec for Merkle-Patricia trie synchronization.
//!
//! This crate defines the trie's node model in a backend-agnostic manner:
//! enough to decode a node's wire encoding, verify it against its hash, and
//! enumerate the children it references. It carries no storage and no
//! mutation machinery.
//!
//! ## Schema
//!
//! Every node is content-addressed: its identifier is the Keccak-256 digest
//! of its RLP encoding. There are three kinds of nodes.
//!   1. Branch nodes, with sixteen child slots indexed by the next path
//!      nibble plus an optional value for the key terminating there.
//!   2. Extension nodes, carrying a shared nibble prefix and a single child.
//!   3. Leaf nodes, carrying a terminal nibble suffix and a value.
//!
//! Leaf and extension paths are stored in the compact ("hex-prefix")
//! encoding, which also distinguishes the two kinds; see [`nibbles`].
//!
//! A child whose own encoding is shorter than 32 bytes is not referenced by
//! hash: its encoding is embedded directly in the parent. Such inline
//! children have no identity of their own and are never fetched separately.

pub mod hasher;
pub mod nibbles;
pub mod node;

use hex_literal::hex;

/// The Keccak-256 digest of a node encoding. The canonical identifier for a
/// node; equality on bytes.
pub type NodeHash = [u8; 32];

/// A node's wire and on-disk encoding.
///
/// Invariant: `hasher::keccak256(&bytes)` equals the [`NodeHash`] the bytes
/// were stored or delivered under.
pub type NodeBytes = Vec<u8>;

/// Root hash of an empty trie: the Keccak-256 of the RLP encoding of the
/// empty string.
pub const EMPTY_ROOT: NodeHash =
    hex!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");
