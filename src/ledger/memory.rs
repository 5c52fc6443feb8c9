/// In-memory ledger emulating the anchor application.
///
/// Behaves like a single ledger node running the anchor program:
/// - the owner, and opted-in accounts the owner approved, may anchor
/// - each confirmed anchor increments `anchor_count` and writes its slot
/// - rounds advance by one on every status poll, and each round is
///   three seconds of ledger time
///
/// It also stands in for the external wallet: `sign` wraps an unsigned
/// transaction in a signed envelope and remembers it, and only envelopes it
/// produced are accepted by `send_raw_transaction`.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::codec::{CanonicalMap, MsgValue};
use super::{Address, LedgerClient, NetworkParams, PendingTransaction, StateEntry, StateValue};
use crate::anchor::compose::{AnchorPayload, OnComplete, UnsignedTransaction};
use crate::anchor::state::{
    slot_key, COUNT_KEY, COUNT_SUFFIX, FROM_SUFFIX, PROJECT_SUFFIX, TIMESTAMP_SUFFIX, TO_SUFFIX,
};
use crate::crypto::hash;
use crate::error::{AnchorError, Result};

const GENESIS_ID: &str = "inmemory-v1";
const ROUND_SECS: u64 = 3;

/// When submitted transactions confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmBehavior {
    /// Confirm on the n-th status poll (1 = first poll).
    AfterPolls(u32),
    /// Stay pending forever.
    Never,
    /// Drop from the pool with this reason on the first poll.
    Drop(String),
}

#[derive(Debug)]
struct PendingTxn {
    txn: UnsignedTransaction,
    polls: u32,
    outcome: Option<PendingTransaction>,
}

#[derive(Debug)]
struct LedgerState {
    round: u64,
    global: HashMap<Vec<u8>, StateValue>,
    opted_in: HashSet<Address>,
    approved: HashSet<Address>,
    signed: HashMap<Vec<u8>, UnsignedTransaction>,
    pool: HashMap<String, PendingTxn>,
    behavior: ConfirmBehavior,
}

/// In-process `LedgerClient` implementation.
pub struct InMemoryLedger {
    app_id: u64,
    owner: Address,
    genesis_time: u64,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    /// A ledger hosting the anchor application `app_id`, created by `owner`.
    pub fn new(app_id: u64, owner: Address) -> Self {
        let mut global = HashMap::new();
        global.insert(COUNT_KEY.to_vec(), StateValue::Uint(0));
        global.insert(b"owner".to_vec(), StateValue::Bytes(owner.0.to_vec()));

        Self {
            app_id,
            owner,
            genesis_time: 1_700_000_000,
            state: Mutex::new(LedgerState {
                round: 1,
                global,
                opted_in: HashSet::new(),
                approved: HashSet::new(),
                signed: HashMap::new(),
                pool: HashMap::new(),
                behavior: ConfirmBehavior::AfterPolls(1),
            }),
        }
    }

    pub fn with_behavior(self, behavior: ConfirmBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    /// Change how later submissions confirm.
    pub fn set_behavior(&self, behavior: ConfirmBehavior) {
        self.lock().behavior = behavior;
    }

    /// Approve an opted-in account to anchor (owner action).
    pub fn approve(&self, account: Address) {
        self.lock().approved.insert(account);
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    pub fn current_round(&self) -> u64 {
        self.lock().round
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sign a transaction as the wallet would. The returned envelope is
    /// the only form `send_raw_transaction` accepts.
    pub fn sign(&self, txn: &UnsignedTransaction) -> Vec<u8> {
        let digest = hash::sha512_256(&txn.bytes_to_sign());
        let mut sig = digest.to_vec();
        sig.extend_from_slice(&hash::sha512_256(&digest));

        let envelope = CanonicalMap::new()
            .field("sig", MsgValue::Bin(sig))
            .field("txn", MsgValue::Map(txn.to_map()))
            .encode();

        self.lock().signed.insert(envelope.clone(), txn.clone());
        envelope
    }

    /// Program logic applied when a transaction confirms.
    fn apply(&self, state: &mut LedgerState, txn: &UnsignedTransaction) -> Vec<StateEntry> {
        match txn.on_complete {
            OnComplete::OptIn => {
                state.opted_in.insert(txn.sender);
                Vec::new()
            }
            OnComplete::NoOp => {
                // Checked at relay time; cannot fail here.
                let Some(payload) = txn.anchor_payload() else {
                    return Vec::new();
                };
                let count = match state.global.get(COUNT_KEY) {
                    Some(StateValue::Uint(n)) => n + 1,
                    _ => 1,
                };
                let timestamp = self.genesis_time + state.round * ROUND_SECS;

                let writes = vec![
                    (COUNT_KEY.to_vec(), StateValue::Uint(count)),
                    (slot_key(count, b""), StateValue::Bytes(payload.merkle_root.to_vec())),
                    (
                        slot_key(count, PROJECT_SUFFIX),
                        StateValue::Bytes(payload.project_id.into_bytes()),
                    ),
                    (
                        slot_key(count, COUNT_SUFFIX),
                        StateValue::Bytes(payload.record_count.to_be_bytes().to_vec()),
                    ),
                    (
                        slot_key(count, FROM_SUFFIX),
                        StateValue::Bytes(payload.window.from.to_be_bytes().to_vec()),
                    ),
                    (
                        slot_key(count, TO_SUFFIX),
                        StateValue::Bytes(payload.window.to.to_be_bytes().to_vec()),
                    ),
                    (
                        slot_key(count, TIMESTAMP_SUFFIX),
                        StateValue::Bytes(timestamp.to_be_bytes().to_vec()),
                    ),
                ];

                writes
                    .into_iter()
                    .map(|(key, value)| {
                        state.global.insert(key.clone(), value.clone());
                        StateEntry { key, value }
                    })
                    .collect()
            }
        }
    }

    /// Checks the node and the approval program run before admitting a
    /// transaction to the pool.
    fn admit(&self, state: &LedgerState, txn: &UnsignedTransaction) -> Result<()> {
        if txn.app_id != self.app_id {
            return Err(AnchorError::NetworkRejected(format!(
                "application {} does not exist",
                txn.app_id
            )));
        }
        if txn.genesis_id != GENESIS_ID {
            return Err(AnchorError::NetworkRejected(format!(
                "genesis id mismatch: {}",
                txn.genesis_id
            )));
        }
        if state.round < txn.first_valid || state.round > txn.last_valid {
            return Err(AnchorError::NetworkRejected(format!(
                "txn dead: round {} outside [{}, {}]",
                state.round, txn.first_valid, txn.last_valid
            )));
        }
        if txn.on_complete == OnComplete::NoOp {
            AnchorPayload::from_app_args(&txn.app_args).map_err(|e| {
                AnchorError::NetworkRejected(format!("logic eval error: {e}"))
            })?;
            let authorized = txn.sender == self.owner
                || (state.opted_in.contains(&txn.sender) && state.approved.contains(&txn.sender));
            if !authorized {
                return Err(AnchorError::NetworkRejected(
                    "logic eval error: rejected by ApprovalProgram".into(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn suggested_params(&self) -> Result<NetworkParams> {
        let state = self.lock();
        Ok(NetworkParams {
            fee_per_byte: 0,
            min_fee: 1000,
            last_round: state.round,
            genesis_id: GENESIS_ID.to_string(),
            genesis_hash: hash::hash(GENESIS_ID.as_bytes()),
        })
    }

    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String> {
        let mut state = self.lock();
        let txn = state
            .signed
            .get(signed)
            .cloned()
            .ok_or_else(|| AnchorError::NetworkRejected("invalid signature".into()))?;
        self.admit(&state, &txn)?;

        let tx_id = txn.id();
        if state.pool.contains_key(&tx_id) {
            return Err(AnchorError::NetworkRejected(format!(
                "transaction already in ledger: {tx_id}"
            )));
        }
        debug!(tx_id = %tx_id, "Transaction admitted to pool");
        state.pool.insert(
            tx_id.clone(),
            PendingTxn {
                txn,
                polls: 0,
                outcome: None,
            },
        );
        Ok(tx_id)
    }

    async fn pending_transaction(&self, tx_id: &str) -> Result<PendingTransaction> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.round += 1;

        let behavior = state.behavior.clone();
        let round = state.round;
        let pending = state
            .pool
            .get_mut(tx_id)
            .ok_or_else(|| AnchorError::Network(format!("transaction {tx_id} not found")))?;

        if let Some(outcome) = &pending.outcome {
            return Ok(outcome.clone());
        }
        pending.polls += 1;

        let outcome = match behavior {
            ConfirmBehavior::Never => return Ok(PendingTransaction::Pending),
            ConfirmBehavior::AfterPolls(n) if pending.polls < n => {
                return Ok(PendingTransaction::Pending)
            }
            ConfirmBehavior::Drop(reason) => PendingTransaction::Rejected(reason),
            ConfirmBehavior::AfterPolls(_) => {
                let txn = pending.txn.clone();
                let global_delta = self.apply(state, &txn);
                PendingTransaction::Confirmed {
                    round,
                    global_delta,
                }
            }
        };

        if let Some(pending) = state.pool.get_mut(tx_id) {
            pending.outcome = Some(outcome.clone());
        }
        Ok(outcome)
    }

    async fn application_state(&self, app_id: u64) -> Result<Vec<StateEntry>> {
        if app_id != self.app_id {
            return Err(AnchorError::Network(format!(
                "application {app_id} does not exist"
            )));
        }
        let state = self.lock();
        Ok(state
            .global
            .iter()
            .map(|(key, value)| StateEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
