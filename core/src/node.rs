//! Decoded Merkle-Patricia trie nodes.
//!
//! A node's wire encoding is an RLP list of either 2 items (a leaf or an
//! extension, told apart by the compact path's terminator flag) or 17 items
//! (a branch: sixteen child slots plus an optional value). A child slot
//! holds the empty string, a 32-byte child hash, or, when the child's own
//! encoding is shorter than 32 bytes, that encoding embedded in place.

use crate::{nibbles, NodeBytes, NodeHash};
use alloy_rlp::{Encodable, Header, EMPTY_STRING_CODE};
use thiserror::Error;

/// Children whose encoding reaches this length are referenced by hash;
/// shorter ones are embedded in the parent.
pub const HASH_REF_LEN: usize = 32;

/// Failure to parse a node encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not well-formed RLP.
    #[error("malformed rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The outer list holds neither 2 nor 17 items.
    #[error("node list has {0} items, expected 2 or 17")]
    Arity(usize),
    /// A compact path prefix with a reserved bit set or bad padding.
    #[error("invalid compact path prefix {0:#04x}")]
    PathPrefix(u8),
    /// The path item of a two-item node is empty.
    #[error("empty compact path")]
    EmptyPath,
    /// A child slot holds a string that is neither empty nor a hash, or an
    /// embedded encoding too long to be inlined.
    #[error("child reference of {0} bytes")]
    ChildLen(usize),
    /// Data continues past the end of the node's list payload.
    #[error("trailing bytes after node payload")]
    TrailingBytes,
}

/// A reference from a node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    /// The Keccak-256 digest of the child's encoding; the child must be
    /// resolved separately.
    Hash(NodeHash),
    /// The child's full encoding, carried inline because it is shorter
    /// than [`HASH_REF_LEN`] bytes.
    Inline(NodeBytes),
}

/// A decoded trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Sixteen child slots indexed by the next path nibble, plus an
    /// optional value for the key terminating at this node.
    Branch {
        /// Child references by next path nibble.
        children: [Option<ChildRef>; 16],
        /// The value stored at the key ending here, if any.
        value: Option<NodeBytes>,
    },
    /// A shared nibble prefix and a single child continuing the path.
    Extension {
        /// The shared path segment, as nibbles.
        path: Vec<u8>,
        /// The child below the segment.
        child: ChildRef,
    },
    /// A terminal nibble suffix and a value.
    Leaf {
        /// The remaining path segment, as nibbles.
        path: Vec<u8>,
        /// The value stored at this key.
        value: NodeBytes,
    },
}

/// One item of a node's RLP list payload.
enum Item<'a> {
    /// A string item's payload.
    Str(&'a [u8]),
    /// A nested list item's full encoding, header included.
    List(&'a [u8]),
}

fn take_item<'a>(buf: &mut &'a [u8]) -> Result<Item<'a>, DecodeError> {
    let start = *buf;
    let header = Header::decode(buf)?;
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort.into());
    }
    if header.list {
        let total = (start.len() - buf.len()) + header.payload_length;
        let raw = &start[..total];
        *buf = &start[total..];
        Ok(Item::List(raw))
    } else {
        let payload = &buf[..header.payload_length];
        *buf = &buf[header.payload_length..];
        Ok(Item::Str(payload))
    }
}

/// Interpret a list item as a child slot: empty, hash, or inline encoding.
fn child_ref(item: &Item) -> Result<Option<ChildRef>, DecodeError> {
    match item {
        Item::Str(s) if s.is_empty() => Ok(None),
        Item::Str(s) if s.len() == HASH_REF_LEN => {
            let mut hash = NodeHash::default();
            hash.copy_from_slice(s);
            Ok(Some(ChildRef::Hash(hash)))
        }
        Item::Str(s) => Err(DecodeError::ChildLen(s.len())),
        Item::List(raw) if raw.len() < HASH_REF_LEN => {
            Ok(Some(ChildRef::Inline(raw.to_vec())))
        }
        Item::List(raw) => Err(DecodeError::ChildLen(raw.len())),
    }
}

impl Node {
    /// Decode a node from its RLP encoding.
    pub fn decode(bytes: &[u8]) -> Result<Node, DecodeError> {
        let buf = &mut &bytes[..];
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into());
        }
        if buf.len() != header.payload_length {
            return Err(DecodeError::TrailingBytes);
        }
        let mut items = Vec::with_capacity(17);
        while !buf.is_empty() {
            items.push(take_item(buf)?);
        }
        match items.len() {
            2 => Self::decode_short(&items[0], &items[1]),
            17 => Self::decode_branch(&items),
            n => Err(DecodeError::Arity(n)),
        }
    }

    fn decode_short(path_item: &Item, rest: &Item) -> Result<Node, DecodeError> {
        let Item::Str(encoded_path) = path_item else {
            return Err(alloy_rlp::Error::UnexpectedList.into());
        };
        let (path, leaf) = nibbles::decode_path(encoded_path)?;
        if leaf {
            let Item::Str(value) = rest else {
                return Err(alloy_rlp::Error::UnexpectedList.into());
            };
            Ok(Node::Leaf {
                path,
                value: value.to_vec(),
            })
        } else {
            let child = child_ref(rest)?.ok_or(DecodeError::ChildLen(0))?;
            Ok(Node::Extension { path, child })
        }
    }

    fn decode_branch(items: &[Item]) -> Result<Node, DecodeError> {
        let mut children: [Option<ChildRef>; 16] = std::array::from_fn(|_| None);
        for (slot, item) in children.iter_mut().zip(&items[..16]) {
            *slot = child_ref(item)?;
        }
        let value = match &items[16] {
            Item::Str(s) if s.is_empty() => None,
            Item::Str(s) => Some(s.to_vec()),
            Item::List(_) => return Err(alloy_rlp::Error::UnexpectedList.into()),
        };
        Ok(Node::Branch { children, value })
    }

    /// Encode the node into its canonical RLP form.
    pub fn encode(&self) -> NodeBytes {
        let mut payload = Vec::new();
        match self {
            Node::Leaf { path, value } => {
                nibbles::encode_path(path, true)[..].encode(&mut payload);
                value[..].encode(&mut payload);
            }
            Node::Extension { path, child } => {
                nibbles::encode_path(path, false)[..].encode(&mut payload);
                encode_child(&mut payload, Some(child));
            }
            Node::Branch { children, value } => {
                for slot in children {
                    encode_child(&mut payload, slot.as_ref());
                }
                match value {
                    Some(value) => value[..].encode(&mut payload),
                    None => payload.push(EMPTY_STRING_CODE),
                }
            }
        }
        let mut out = Vec::with_capacity(payload.len() + 3);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// Iterate the node's child references, skipping empty slots. Values
    /// are not children; leaves yield nothing.
    pub fn children(&self) -> impl Iterator<Item = &ChildRef> + '_ {
        let (slots, single): (&[Option<ChildRef>], Option<&ChildRef>) = match self {
            Node::Branch { children, .. } => (&children[..], None),
            Node::Extension { child, .. } => (&[], Some(child)),
            Node::Leaf { .. } => (&[], None),
        };
        slots.iter().flatten().chain(single)
    }
}

fn encode_child(out: &mut Vec<u8>, child: Option<&ChildRef>) {
    match child {
        None => out.push(EMPTY_STRING_CODE),
        Some(ChildRef::Hash(hash)) => hash[..].encode(out),
        Some(ChildRef::Inline(raw)) => out.extend_from_slice(raw),
    }
}
