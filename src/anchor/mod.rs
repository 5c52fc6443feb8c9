/// Ledger anchoring of Merkle roots for tamper-evident record batches.
///
/// An anchor commits a batch's Merkle root together with its project, its
/// record count and the time window the records cover. The flow is:
///
/// ```text
/// records ──▶ Merkle root ──▶ compose (unsigned txn) ──▶ external signer
///                                                            │
///            state reader ◀── ledger ◀── submit (signed txn) ◀┘
/// ```
///
/// Anchors are immutable once confirmed. The ledger is the only source of
/// truth for them; everything here is a view.
pub mod compose;
pub mod state;
pub mod submit;

use serde::{Deserialize, Serialize};

use crate::error::{AnchorError, Result};
use crate::merkle::proof::{hex_digest, InclusionProof};
use crate::merkle::record_leaf;

/// Length of the reference deployment's default window: one day.
pub const DEFAULT_WINDOW_SECS: u64 = 86_400;

/// Inclusive time window covered by a batch, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    #[serde(rename = "fromTimestamp")]
    pub from: u64,
    #[serde(rename = "toTimestamp")]
    pub to: u64,
}

impl TimeWindow {
    /// A window `[from, to]`. Fails if `from > to`.
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if from > to {
            return Err(AnchorError::InvalidInput(format!(
                "time window start {from} is after end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    /// The `length_secs` seconds ending at `now`.
    pub fn ending_at(now: u64, length_secs: u64) -> Self {
        Self {
            from: now.saturating_sub(length_secs),
            to: now,
        }
    }
}

/// A confirmed anchor as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Zero-based position in confirmation order.
    pub index: u64,
    pub project_id: String,
    #[serde(with = "hex_digest")]
    pub merkle_root: [u8; 32],
    pub record_count: u64,
    #[serde(flatten)]
    pub window: TimeWindow,
    /// Ledger timestamp of the confirming block, in unix seconds.
    pub confirmed_at: u64,
    /// Transaction id, when known from the submission. The ledger state
    /// does not record it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tx_id: Option<String>,
}

/// Verify that `record` is part of the batch committed by `anchor`.
///
/// Unlike a bare root check, this also requires the proof to describe a
/// batch of exactly `anchor.record_count` leaves with a path shape matching
/// its index, so a proof against a padded batch is refused.
pub fn verify_for_anchor<T: Serialize>(
    record: &T,
    proof: &InclusionProof,
    anchor: &Anchor,
) -> bool {
    if proof.leaf_count as u64 != anchor.record_count || !proof.is_well_formed() {
        return false;
    }
    match record_leaf(record) {
        Ok(leaf) => crate::merkle::verify(&leaf, proof, &anchor.merkle_root),
        Err(_) => false,
    }
}
