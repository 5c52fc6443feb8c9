/// Ledger access for anchoring.
///
/// The ledger is an external, append-only, eventually-finalizing state
/// machine. This module defines the narrow interface the anchoring core
/// needs from it and ships two implementations:
/// - `AlgodClient`: the algod REST API of a ledger node
/// - `InMemoryLedger`: an in-process emulation of the anchor application.
///   Only built for this crate's tests or with the `test-util` feature.
///
/// Clients are constructed by the caller and passed in explicitly. There is
/// no process-wide client.
pub mod address;
pub mod algod;
pub mod codec;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use address::Address;
pub use algod::AlgodClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryLedger;

/// Network parameters required to build a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Fee per byte of the signed transaction, in micro-units.
    pub fee_per_byte: u64,
    /// Minimum flat fee, in micro-units.
    pub min_fee: u64,
    /// Latest round known to the node.
    pub last_round: u64,
    pub genesis_id: String,
    pub genesis_hash: [u8; 32],
}

/// Status of a submitted transaction as reported by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTransaction {
    /// Accepted into the pool, not yet in a block.
    Pending,
    /// Included in a block and final.
    Confirmed {
        round: u64,
        /// Application global state changes made by the transaction.
        global_delta: Vec<StateEntry>,
    },
    /// Dropped from the pool with a reason.
    Rejected(String),
}

/// A primitive value in application state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Bytes(Vec<u8>),
    Uint(u64),
}

/// One key/value entry of application global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: Vec<u8>,
    pub value: StateValue,
}

/// Trait for ledger backends.
///
/// Implementations must be safe to share across tasks; the anchoring core
/// never holds more than one in-flight submission per `Submitter`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Human-readable name of the backend (e.g., "algod", "in-memory").
    fn name(&self) -> &str;

    /// Suggested parameters for a new transaction.
    async fn suggested_params(&self) -> Result<NetworkParams>;

    /// Relay a signed transaction. Returns the transaction id.
    /// Refusals are `AnchorError::NetworkRejected`.
    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String>;

    /// Current status of a previously sent transaction.
    async fn pending_transaction(&self, tx_id: &str) -> Result<PendingTransaction>;

    /// Global state of an application.
    async fn application_state(&self, app_id: u64) -> Result<Vec<StateEntry>>;
}
