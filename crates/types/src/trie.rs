//! Merkle-Patricia trie nodes as they travel the wire.

use crate::{encode, DecodeError, Hash};
use serde::{Deserialize, Serialize};

/// Branching factor of the account tries.
pub const BRANCH_WIDTH: usize = 16;

/// A node of an account trie.
///
/// Nodes are content-addressed: the node's identity is the hash of its
/// canonical encoding. A trie is the DAG reachable from a root hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// An interior node with up to [BRANCH_WIDTH] children and an optional
    /// value terminating at this node.
    Branch {
        /// Child hash per nibble, `None` where the subtree is empty.
        children: [Option<Hash>; BRANCH_WIDTH],
        /// Value stored at the branch itself.
        value: Option<Vec<u8>>,
    },
    /// A shared path fragment compressing a single-child chain.
    Extension {
        /// The compressed nibble path.
        path: Vec<u8>,
        /// Hash of the single child.
        child: Hash,
    },
    /// A terminal node holding account state.
    Leaf {
        /// Remaining nibble path.
        path: Vec<u8>,
        /// The account state bytes.
        value: Vec<u8>,
    },
}

impl TrieNode {
    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::compute(&encode(self))
    }

    /// Decode a node received from the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::decode(bytes)
    }

    /// Hashes of all referenced children.
    pub fn child_hashes(&self) -> Vec<Hash> {
        match self {
            Self::Branch { children, .. } => children.iter().flatten().copied().collect(),
            Self::Extension { child, .. } => vec![*child],
            Self::Leaf { .. } => Vec::new(),
        }
    }

    /// True when the node terminates a path.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// A leaf with the given path and value.
    pub fn leaf(path: &[u8], value: &[u8]) -> Self {
        Self::Leaf { path: path.to_vec(), value: value.to_vec() }
    }

    /// A branch over the given `(nibble, child)` pairs.
    pub fn branch(children: &[(usize, Hash)]) -> Self {
        let mut slots: [Option<Hash>; BRANCH_WIDTH] = [None; BRANCH_WIDTH];
        for (nibble, child) in children {
            slots[*nibble] = Some(*child);
        }
        Self::Branch { children: slots, value: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_has_no_children() {
        let leaf = TrieNode::leaf(&[1, 2], b"account");
        assert!(leaf.is_leaf());
        assert!(leaf.child_hashes().is_empty());
    }

    #[test]
    fn branch_children_in_nibble_order() {
        let a = Hash::compute(b"a");
        let b = Hash::compute(b"b");
        let branch = TrieNode::branch(&[(9, b), (0, a)]);
        assert_eq!(branch.child_hashes(), vec![a, b]);
    }

    #[test]
    fn wire_round_trip_preserves_hash() {
        let node = TrieNode::Extension { path: vec![3, 1], child: Hash::compute(b"child") };
        let bytes = encode(&node);
        let decoded = TrieNode::from_bytes(&bytes).unwrap();
        assert_eq!(node.hash(), decoded.hash());
        assert_eq!(Hash::compute(&bytes), node.hash());
    }
}
