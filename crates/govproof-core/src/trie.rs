//! Merkle-Patricia trie proof verification.
//!
//! A proof is the ordered list of hashed nodes on the path from the root to
//! the key (the `accountProof` / `storageProof[].proof` arrays of
//! `eth_getProof`). Nodes shorter than 32 bytes are embedded in their parent
//! and walked in place.

use thiserror::Error;

use crate::{
    keccak::keccak256,
    rlp::{self, Item, MalformedRlp},
    types::Bytes32,
};

pub const MAX_PROOF_DEPTH: usize = 64;
pub const MAX_NODE_BYTES: usize = 4096;

/// Root of a trie with no entries: `keccak256(0x80)`.
pub const EMPTY_TRIE_ROOT: Bytes32 = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error(
        "first proof node hashes to 0x{} but the trusted root is 0x{}",
        hex::encode(.actual),
        hex::encode(.expected)
    )]
    RootMismatch { expected: Bytes32, actual: Bytes32 },
    #[error("invalid proof at node {depth}: {fault}")]
    Invalid { depth: usize, fault: TrieFault },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TrieFault {
    #[error("proof node does not match parent reference")]
    NodeReference,
    #[error("invalid RLP node encoding: {0}")]
    Rlp(#[from] MalformedRlp),
    #[error("invalid trie node shape")]
    NodeShape,
    #[error("invalid hex-prefix path encoding")]
    PathEncoding,
    #[error("inline node reference encodes to 32 bytes or more")]
    InlineTooLarge,
    #[error("leaf carries an empty value")]
    EmptyValue,
    #[error("proof ends before the key path resolves")]
    MissingNode,
    #[error("proof has nodes past the terminal node")]
    TrailingNodes,
    #[error("proof exceeds {} nodes", MAX_PROOF_DEPTH)]
    ProofTooDeep,
    #[error("proof node exceeds {} bytes", MAX_NODE_BYTES)]
    NodeTooLarge,
}

/// A key expanded to one nibble (0..=15) per element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NibblePath(Vec<u8>);

impl NibblePath {
    pub fn from_key(key: &[u8]) -> Self {
        let mut out = Vec::with_capacity(key.len() * 2);
        for b in key {
            out.push(b >> 4);
            out.push(b & 0x0f);
        }
        Self(out)
    }

    pub fn from_nibbles(nibbles: Vec<u8>) -> Self {
        Self(nibbles)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reference from a parent node to a child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildRef {
    Empty,
    Hash(Bytes32),
    Inline(Box<MptNode>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MptNode {
    Branch {
        children: [ChildRef; 16],
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: ChildRef,
    },
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
}

impl MptNode {
    pub fn decode(raw: &[u8]) -> Result<Self, TrieFault> {
        Self::from_item(&rlp::decode(raw)?)
    }

    fn from_item(item: &Item) -> Result<Self, TrieFault> {
        let elements = item.as_list()?;
        match elements.len() {
            17 => {
                let mut refs = Vec::with_capacity(16);
                for element in &elements[..16] {
                    refs.push(ChildRef::from_item(element)?);
                }
                let children: [ChildRef; 16] =
                    refs.try_into().map_err(|_| TrieFault::NodeShape)?;
                let value = elements[16].as_bytes()?.to_vec();
                Ok(MptNode::Branch { children, value })
            }
            2 => {
                let (is_leaf, path) = decode_hex_prefix(elements[0].as_bytes()?)?;
                if is_leaf {
                    let value = elements[1].as_bytes()?.to_vec();
                    Ok(MptNode::Leaf { path, value })
                } else {
                    if path.is_empty() {
                        return Err(TrieFault::PathEncoding);
                    }
                    match ChildRef::from_item(&elements[1])? {
                        ChildRef::Empty => Err(TrieFault::NodeShape),
                        child => Ok(MptNode::Extension { path, child }),
                    }
                }
            }
            _ => Err(TrieFault::NodeShape),
        }
    }

    fn to_item(&self) -> Item {
        match self {
            MptNode::Branch { children, value } => {
                let mut items: Vec<Item> = children.iter().map(ChildRef::to_item).collect();
                items.push(Item::Bytes(value.clone()));
                Item::List(items)
            }
            MptNode::Extension { path, child } => Item::List(vec![
                Item::Bytes(encode_hex_prefix(path, false)),
                child.to_item(),
            ]),
            MptNode::Leaf { path, value } => Item::List(vec![
                Item::Bytes(encode_hex_prefix(path, true)),
                Item::Bytes(value.clone()),
            ]),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(&self.to_item())
    }

    /// How a parent refers to this node: inline below 32 encoded bytes, by hash otherwise.
    pub fn reference(&self) -> ChildRef {
        let encoded = self.encode();
        if encoded.len() < 32 {
            ChildRef::Inline(Box::new(self.clone()))
        } else {
            ChildRef::Hash(keccak256(&encoded))
        }
    }
}

impl ChildRef {
    fn from_item(item: &Item) -> Result<Self, TrieFault> {
        match item {
            Item::Bytes(b) if b.is_empty() => Ok(ChildRef::Empty),
            Item::Bytes(b) if b.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(b);
                Ok(ChildRef::Hash(hash))
            }
            Item::Bytes(_) => Err(TrieFault::NodeShape),
            Item::List(_) => {
                if rlp::encode(item).len() >= 32 {
                    return Err(TrieFault::InlineTooLarge);
                }
                Ok(ChildRef::Inline(Box::new(MptNode::from_item(item)?)))
            }
        }
    }

    fn to_item(&self) -> Item {
        match self {
            ChildRef::Empty => Item::Bytes(Vec::new()),
            ChildRef::Hash(hash) => Item::Bytes(hash.to_vec()),
            ChildRef::Inline(node) => node.to_item(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hex-prefix path encoding
// ---------------------------------------------------------------------------

/// Hex-prefix encode `nibbles`. Flag nibble: bit 1 = leaf, bit 0 = odd length.
pub fn encode_hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let flag = (if is_leaf { 2u8 } else { 0 }) | (if odd { 1 } else { 0 });

    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if odd {
        out.push((flag << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

/// Decode a hex-prefix path into `(is_leaf, nibbles)`.
pub fn decode_hex_prefix(encoded: &[u8]) -> Result<(bool, Vec<u8>), TrieFault> {
    let first = *encoded.first().ok_or(TrieFault::PathEncoding)?;

    let flag = first >> 4;
    if flag > 3 {
        return Err(TrieFault::PathEncoding);
    }
    let is_leaf = (flag & 0x2) != 0;
    let is_odd = (flag & 0x1) != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(TrieFault::PathEncoding);
    }
    for byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((is_leaf, nibbles))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

enum Step {
    Found(Vec<u8>),
    Absent,
    Next(Bytes32),
    Inline(MptNode),
}

/// Verify `proof` for `key` against the trusted `root`.
///
/// Returns `Ok(Some(value))` for inclusion and `Ok(None)` for a proof of
/// absence. Each proof node must hash to the reference held by its parent;
/// the first node must hash to `root`.
pub fn verify_proof<T: AsRef<[u8]>>(
    root: &Bytes32,
    key: &NibblePath,
    proof: &[T],
) -> Result<Option<Vec<u8>>, ProofError> {
    if proof.is_empty() {
        if *root == EMPTY_TRIE_ROOT {
            return Ok(None);
        }
        return Err(invalid(0, TrieFault::MissingNode));
    }
    if proof.len() > MAX_PROOF_DEPTH {
        return Err(invalid(0, TrieFault::ProofTooDeep));
    }

    let nibbles = key.as_slice();
    let mut key_index = 0usize;
    let mut expected = *root;

    for (depth, raw) in proof.iter().enumerate() {
        let raw = raw.as_ref();
        if raw.len() > MAX_NODE_BYTES {
            return Err(invalid(depth, TrieFault::NodeTooLarge));
        }

        let hash = keccak256(raw);
        if hash != expected {
            if depth == 0 {
                return Err(ProofError::RootMismatch {
                    expected: *root,
                    actual: hash,
                });
            }
            return Err(invalid(depth, TrieFault::NodeReference));
        }

        let mut node = MptNode::decode(raw).map_err(|fault| invalid(depth, fault))?;
        let outcome = loop {
            match step(node, nibbles, &mut key_index).map_err(|fault| invalid(depth, fault))? {
                Step::Inline(child) => node = child,
                other => break other,
            }
        };

        match outcome {
            Step::Next(child_hash) => expected = child_hash,
            Step::Found(value) => return finish(depth, proof.len(), Some(value)),
            Step::Absent => return finish(depth, proof.len(), None),
            Step::Inline(_) => unreachable!("inline children are walked in place"),
        }
    }

    Err(invalid(proof.len(), TrieFault::MissingNode))
}

fn finish(
    depth: usize,
    proof_len: usize,
    value: Option<Vec<u8>>,
) -> Result<Option<Vec<u8>>, ProofError> {
    if depth + 1 != proof_len {
        return Err(invalid(depth + 1, TrieFault::TrailingNodes));
    }
    Ok(value)
}

fn step(node: MptNode, nibbles: &[u8], key_index: &mut usize) -> Result<Step, TrieFault> {
    match node {
        MptNode::Branch { children, value } => {
            if *key_index == nibbles.len() {
                return Ok(if value.is_empty() {
                    Step::Absent
                } else {
                    Step::Found(value)
                });
            }
            let nibble = nibbles[*key_index] as usize;
            *key_index += 1;
            let child = children
                .into_iter()
                .nth(nibble)
                .ok_or(TrieFault::PathEncoding)?;
            Ok(follow(child))
        }
        MptNode::Extension { path, child } => {
            let remaining = &nibbles[*key_index..];
            if !remaining.starts_with(&path) {
                return Ok(Step::Absent);
            }
            *key_index += path.len();
            Ok(follow(child))
        }
        MptNode::Leaf { path, value } => {
            if nibbles[*key_index..] != path[..] {
                return Ok(Step::Absent);
            }
            *key_index = nibbles.len();
            if value.is_empty() {
                return Err(TrieFault::EmptyValue);
            }
            Ok(Step::Found(value))
        }
    }
}

fn follow(child: ChildRef) -> Step {
    match child {
        ChildRef::Empty => Step::Absent,
        ChildRef::Hash(hash) => Step::Next(hash),
        ChildRef::Inline(node) => Step::Inline(*node),
    }
}

fn invalid(depth: usize, fault: TrieFault) -> ProofError {
    ProofError::Invalid { depth, fault }
}
