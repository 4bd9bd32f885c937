//! Merkle tree over a transaction-id sequence (spec §2, §4.1).
//!
//! Node hash is plain `SHA-256d(left || right)` — no domain separation.
//! Txids are used directly as leaves. Odd-length layers are padded by
//! duplicating the last element, matching the classic Bitcoin construction.
//! Empty trees produce [`Hash256::ZERO`].

use serde::{Deserialize, Serialize};

use crate::types::Hash256;

/// Combine two node hashes: `SHA-256d(left || right)`.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    Hash256::hash256(&data)
}

/// Compute the Merkle root over a sequence of txids.
///
/// Returns [`Hash256::ZERO`] for an empty slice. More efficient than building
/// a full [`MerkleTree`] when an inclusion proof is not required.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut current: Vec<Hash256> = txids.to_vec();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

/// Compute the next layer up from `layer`, duplicating the last element
/// when the layer has an odd count (spec §2: "odd-count duplication").
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() {
            &layer[i + 1]
        } else {
            left
        };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

/// Full Merkle tree retaining intermediate layers so inclusion proofs can be
/// extracted for any leaf.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaves: Vec<Hash256>,
    /// `layers[0]` = txids, `layers[last]` = `[root]`.
    layers: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    pub fn from_txids(txids: &[Hash256]) -> Self {
        if txids.is_empty() {
            return Self {
                leaves: Vec::new(),
                layers: Vec::new(),
            };
        }

        let mut layers = vec![txids.to_vec()];
        while layers.last().unwrap().len() > 1 {
            let prev = layers.last().unwrap();
            layers.push(next_layer(prev));
        }

        Self {
            leaves: txids.to_vec(),
            layers,
        }
    }

    pub fn root(&self) -> Hash256 {
        self.layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(Hash256::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Generate an inclusion proof for the txid at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if self.leaves.is_empty() || index >= self.leaves.len() {
            return None;
        }

        let mut path = Vec::new();
        let mut pos = index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_pos = pos ^ 1;
            let sibling = if sibling_pos < layer.len() {
                layer[sibling_pos]
            } else {
                layer[pos]
            };

            let side = if pos % 2 == 0 {
                Side::Right
            } else {
                Side::Left
            };

            path.push(ProofStep { hash: sibling, side });
            pos /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            txid: self.leaves[index],
            path,
        })
    }
}

/// Which side a sibling hash is on relative to the current node.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProofStep {
    pub hash: Hash256,
    pub side: Side,
}

/// Merkle inclusion proof for a single txid.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub txid: Hash256,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from the txid and sibling path, and compare.
    pub fn verify(&self, expected_root: &Hash256) -> bool {
        let mut current = self.txid;
        for step in &self.path {
            current = match step.side {
                Side::Left => node_hash(&step.hash, &current),
                Side::Right => node_hash(&current, &step.hash),
            };
        }
        current == *expected_root
    }
}
