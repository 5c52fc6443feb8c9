/// Anchor state reader.
///
/// Reconstructs anchors from the anchor application's global state. The
/// application keeps:
///
/// ```text
/// "anchor_count"                      uint    number of anchors
/// "anchor_" ‖ u64be(n)                bytes   merkle root of anchor n
/// "anchor_" ‖ u64be(n) ‖ "_project"   bytes   project id
/// "anchor_" ‖ u64be(n) ‖ "_count"     bytes   record count (u64be)
/// "anchor_" ‖ u64be(n) ‖ "_from"      bytes   window start (u64be)
/// "anchor_" ‖ u64be(n) ‖ "_to"        bytes   window end (u64be)
/// "anchor_" ‖ u64be(n) ‖ "_timestamp" bytes   block timestamp (u64be)
/// ```
///
/// Slots `n` start at 1; public indices start at 0, so index `i` lives in
/// slot `i + 1`. Integer fields may be stored either as uints or as 8-byte
/// big-endian byte strings, and both are accepted.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{Anchor, TimeWindow};
use crate::error::{AnchorError, Result};
use crate::ledger::{LedgerClient, StateEntry, StateValue};

/// Key of the anchor counter.
pub const COUNT_KEY: &[u8] = b"anchor_count";

const SLOT_PREFIX: &[u8] = b"anchor_";

/// Per-anchor field suffixes.
pub const PROJECT_SUFFIX: &[u8] = b"_project";
pub const COUNT_SUFFIX: &[u8] = b"_count";
pub const FROM_SUFFIX: &[u8] = b"_from";
pub const TO_SUFFIX: &[u8] = b"_to";
pub const TIMESTAMP_SUFFIX: &[u8] = b"_timestamp";

/// Ledger key for a field of anchor slot `slot`. An empty suffix is the
/// root itself.
pub fn slot_key(slot: u64, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(SLOT_PREFIX.len() + 8 + suffix.len());
    key.extend_from_slice(SLOT_PREFIX);
    key.extend_from_slice(&slot.to_be_bytes());
    key.extend_from_slice(suffix);
    key
}

/// Slot holding the anchor with zero-based `index`.
pub fn slot_for_index(index: u64) -> u64 {
    index + 1
}

/// Decoded view of application global state, indexed by key.
#[derive(Debug, Default)]
pub struct AnchorState {
    entries: HashMap<Vec<u8>, StateValue>,
}

impl AnchorState {
    pub fn from_entries(entries: Vec<StateEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.key, e.value)).collect(),
        }
    }

    /// Number of anchors. An application without a counter has none.
    pub fn anchor_count(&self) -> Result<u64> {
        match self.entries.get(COUNT_KEY) {
            None => Ok(0),
            Some(value) => decode_uint("anchor_count", value),
        }
    }

    /// Decode the anchor with zero-based `index`.
    pub fn anchor(&self, index: u64) -> Result<Anchor> {
        if index >= self.anchor_count()? {
            return Err(AnchorError::NotFound(index));
        }
        let slot = slot_for_index(index);

        let root = match self.entries.get(&slot_key(slot, b"")) {
            Some(value) => decode_bytes("merkle root", value)?,
            None => return Err(AnchorError::NotFound(index)),
        };
        let merkle_root: [u8; 32] = root.as_slice().try_into().map_err(|_| {
            AnchorError::StateDecode(format!(
                "anchor {index} root has {} bytes, expected 32",
                root.len()
            ))
        })?;

        let project = decode_bytes("project id", self.field(index, slot, PROJECT_SUFFIX)?)?;
        let project_id = String::from_utf8(project).map_err(|_| {
            AnchorError::StateDecode(format!("anchor {index} project id is not UTF-8"))
        })?;

        Ok(Anchor {
            index,
            project_id,
            merkle_root,
            record_count: decode_uint("record count", self.field(index, slot, COUNT_SUFFIX)?)?,
            window: TimeWindow {
                from: decode_uint("window start", self.field(index, slot, FROM_SUFFIX)?)?,
                to: decode_uint("window end", self.field(index, slot, TO_SUFFIX)?)?,
            },
            confirmed_at: decode_uint("timestamp", self.field(index, slot, TIMESTAMP_SUFFIX)?)?,
            tx_id: None,
        })
    }

    /// A field that must exist once the root does.
    fn field(&self, index: u64, slot: u64, suffix: &[u8]) -> Result<&StateValue> {
        self.entries.get(&slot_key(slot, suffix)).ok_or_else(|| {
            AnchorError::StateDecode(format!(
                "anchor {index} is missing field {}",
                String::from_utf8_lossy(suffix)
            ))
        })
    }

    /// Every entry, sorted by key.
    pub fn entries(&self) -> Vec<(&[u8], &StateValue)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

fn decode_uint(field: &str, value: &StateValue) -> Result<u64> {
    match value {
        StateValue::Uint(v) => Ok(*v),
        StateValue::Bytes(b) => {
            let raw: [u8; 8] = b.as_slice().try_into().map_err(|_| {
                AnchorError::StateDecode(format!(
                    "{field} holds {} bytes, expected a uint or 8 bytes",
                    b.len()
                ))
            })?;
            Ok(u64::from_be_bytes(raw))
        }
    }
}

fn decode_bytes(field: &str, value: &StateValue) -> Result<Vec<u8>> {
    match value {
        StateValue::Bytes(b) => Ok(b.clone()),
        StateValue::Uint(_) => Err(AnchorError::StateDecode(format!(
            "{field} holds a uint, expected bytes"
        ))),
    }
}

/// Anchor index assigned by a confirmed transaction, from its state delta.
pub fn anchor_index_from_delta(delta: &[StateEntry]) -> Option<u64> {
    delta
        .iter()
        .find(|e| e.key == COUNT_KEY)
        .and_then(|e| decode_uint("anchor_count", &e.value).ok())
        .and_then(|count| count.checked_sub(1))
}

/// Read-only view of anchors held by the ledger.
pub struct AnchorStateReader {
    ledger: Arc<dyn LedgerClient>,
    app_id: u64,
}

impl AnchorStateReader {
    pub fn new(ledger: Arc<dyn LedgerClient>, app_id: u64) -> Self {
        Self { ledger, app_id }
    }

    /// Fetch and index the application state.
    pub async fn load(&self) -> Result<AnchorState> {
        let entries = self.ledger.application_state(self.app_id).await?;
        debug!(
            app_id = self.app_id,
            entries = entries.len(),
            ledger = self.ledger.name(),
            "Loaded application state"
        );
        Ok(AnchorState::from_entries(entries))
    }

    pub async fn read_anchor_count(&self) -> Result<u64> {
        self.load().await?.anchor_count()
    }

    /// Read one anchor. `NotFound` for indices at or beyond the count.
    pub async fn read_anchor(&self, index: u64) -> Result<Anchor> {
        self.load().await?.anchor(index)
    }

    /// All anchors in confirmation order, from one state snapshot.
    pub async fn list_anchors(&self) -> Result<Vec<Anchor>> {
        let state = self.load().await?;
        (0..state.anchor_count()?).map(|i| state.anchor(i)).collect()
    }

    /// Undecoded application state, sorted by key.
    pub async fn raw_state(&self) -> Result<Vec<StateEntry>> {
        let mut entries = self.ledger.application_state(self.app_id).await?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
