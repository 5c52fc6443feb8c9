/// Merkle inclusion proof generation and verification.
///
/// A proof carries one step per tree level, leaf to root. When the target
/// is the odd last node of a level, its sibling is itself (the duplicate),
/// so every level contributes exactly one step.
use serde::{Deserialize, Serialize};

use super::tree::{internal_hash, MerkleTree};
use crate::error::{AnchorError, Result};

/// Position of a sibling relative to the node being proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub position: Position,
    #[serde(with = "hex_digest")]
    pub sibling: [u8; 32],
}

/// A Merkle inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub leaf_index: usize,
    /// Size of the batch the proof was generated from.
    pub leaf_count: usize,
    pub steps: Vec<ProofStep>,
}

impl MerkleTree {
    /// Generate an inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Result<InclusionProof> {
        if index >= self.leaf_count() {
            return Err(AnchorError::IndexOutOfRange {
                index,
                len: self.leaf_count(),
            });
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut idx = index;

        for level in &self.levels[..self.depth()] {
            let (position, sibling_idx) = if idx % 2 == 0 {
                // Last node of an odd level pairs with its own duplicate.
                (Position::Right, (idx + 1).min(level.len() - 1))
            } else {
                (Position::Left, idx - 1)
            };
            steps.push(ProofStep {
                position,
                sibling: level[sibling_idx],
            });
            idx /= 2;
        }

        Ok(InclusionProof {
            leaf_index: index,
            leaf_count: self.leaf_count(),
            steps,
        })
    }
}

impl InclusionProof {
    /// Recompute the root implied by `leaf_digest` and this proof's path.
    pub fn compute_root(&self, leaf_digest: &[u8; 32]) -> [u8; 32] {
        self.steps
            .iter()
            .fold(*leaf_digest, |current, step| match step.position {
                Position::Left => internal_hash(&step.sibling, &current),
                Position::Right => internal_hash(&current, &step.sibling),
            })
    }

    /// Check that the path shape agrees with `leaf_index` and `leaf_count`:
    /// one step per level, each sibling on the side the index implies.
    pub fn is_well_formed(&self) -> bool {
        if self.leaf_count == 0 || self.leaf_index >= self.leaf_count {
            return false;
        }

        let mut width = self.leaf_count;
        let mut idx = self.leaf_index;
        let mut steps = self.steps.iter();

        while width > 1 {
            let expected = if idx % 2 == 0 {
                Position::Right
            } else {
                Position::Left
            };
            match steps.next() {
                Some(step) if step.position == expected => {}
                _ => return false,
            }
            idx /= 2;
            width = width.div_ceil(2);
        }

        steps.next().is_none()
    }
}

/// Build the tree for `leaves` and prove membership of `leaves[index]`.
pub fn prove<T: AsRef<[u8]>>(leaves: &[T], index: usize) -> Result<InclusionProof> {
    if index >= leaves.len() {
        return Err(AnchorError::IndexOutOfRange {
            index,
            len: leaves.len(),
        });
    }
    MerkleTree::from_leaves(leaves)?.prove(index)
}

/// Verify a Merkle inclusion proof against a claimed root.
///
/// A mismatch is an expected outcome, so this returns `false` rather
/// than an error.
pub fn verify(leaf_digest: &[u8; 32], proof: &InclusionProof, claimed_root: &[u8; 32]) -> bool {
    &proof.compute_root(leaf_digest) == claimed_root
}

/// Serde helper: 32-byte digests as lowercase hex strings.
pub(crate) mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        crate::merkle::parse_digest(&text).map_err(serde::de::Error::custom)
    }
}
