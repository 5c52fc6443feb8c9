/// SHA-256 binary Merkle tree over an ordered batch of records.
///
///   leaf      = SHA-256(record bytes)
///   parent    = SHA-256(left || right)
///
/// There is no leaf/internal domain separation: the tree must reproduce the
/// roots already committed by the anchor application.
///
/// If a level has an odd number of nodes, the last node is duplicated and
/// paired with itself. This means a batch `[a, b, c]` and `[a, b, c, c]`
/// share a root (the CVE-2012-2459 shape). Anchors also commit the record
/// count, and `verify_for_anchor` checks it, which is what keeps an
/// anchored batch unambiguous.
use crate::crypto::hash;
use crate::error::{AnchorError, Result};

/// Hash one record's canonical bytes into a leaf.
pub fn leaf_hash(data: &[u8]) -> [u8; 32] {
    hash::hash(data)
}

/// Hash two child nodes to produce a parent.
pub fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    hash::hash_pair(left, right)
}

/// A SHA-256 Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All levels of the tree. levels[0] = leaves, levels[last] = [root].
    /// Levels are stored before duplication, so an odd level keeps its
    /// true length.
    pub(crate) levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf data.
    /// Each item in `leaf_data` is hashed into a leaf.
    pub fn from_leaves<T: AsRef<[u8]>>(leaf_data: &[T]) -> Result<Self> {
        let leaves = leaf_data.iter().map(|d| leaf_hash(d.as_ref())).collect();
        Self::from_leaf_hashes(leaves)
    }

    /// Build from pre-computed leaf hashes.
    pub fn from_leaf_hashes(leaves: Vec<[u8; 32]>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(AnchorError::InvalidInput(
                "cannot build a Merkle tree from an empty batch".into(),
            ));
        }

        let mut levels = vec![leaves];

        while let Some(current) = levels.last().filter(|l| l.len() > 1) {
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => internal_hash(left, right),
                    // Odd node: pair with itself
                    [last] => internal_hash(last, last),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Get the Merkle root.
    pub fn root(&self) -> [u8; 32] {
        // Construction guarantees a non-empty top level.
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Get the leaf hashes.
    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.levels[0]
    }

    /// Number of pairing rounds between the leaves and the root.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Get all levels (for debugging/testing).
    pub fn levels(&self) -> &[Vec<[u8; 32]>] {
        &self.levels
    }
}

/// Compute the root of an ordered batch of records.
///
/// Fails with `InvalidInput` on an empty batch. An empty anchor is never
/// constructible.
pub fn build_root<T: AsRef<[u8]>>(leaf_data: &[T]) -> Result<[u8; 32]> {
    Ok(MerkleTree::from_leaves(leaf_data)?.root())
}
