/// Anchor transaction composition.
///
/// Builds the unsigned application-call transaction that commits a batch
/// root. The application arguments are, in order:
///
/// ```text
/// [0] "anchor"            action tag
/// [1] project id          UTF-8 bytes
/// [2] merkle root         32 raw bytes
/// [3] record count        u64 big-endian
/// [4] window start        u64 big-endian, unix seconds
/// [5] window end          u64 big-endian, unix seconds
/// ```
///
/// Composition is pure: the same inputs and network parameters always
/// produce the same bytes and the same transaction id.
use serde::Serialize;

use super::TimeWindow;
use crate::crypto::hash::DIGEST_LEN;
use crate::error::{AnchorError, Result};
use crate::ledger::address::transaction_id;
use crate::ledger::codec::{CanonicalMap, MsgValue};
use crate::ledger::{Address, NetworkParams};

/// Action tag of an anchoring call.
pub const ANCHOR_ACTION: &[u8] = b"anchor";

/// Rounds a transaction stays valid after the suggested first round. The
/// window is `[last_round, last_round + VALIDITY_WINDOW]`, both inclusive.
pub const VALIDITY_WINDOW: u64 = 1000;

/// Bytes a signature adds to an encoded transaction, used for fee estimates.
const SIGNATURE_OVERHEAD: u64 = 75;

/// What the application call does besides running the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnComplete {
    NoOp,
    OptIn,
}

impl OnComplete {
    fn code(self) -> u64 {
        match self {
            OnComplete::NoOp => 0,
            OnComplete::OptIn => 1,
        }
    }
}

/// The fields an anchor commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPayload {
    pub project_id: String,
    pub merkle_root: [u8; 32],
    pub record_count: u64,
    pub window: TimeWindow,
}

impl AnchorPayload {
    /// Validate raw inputs into a payload.
    pub fn new(
        project_id: &str,
        merkle_root: &[u8],
        record_count: u64,
        from_ts: u64,
        to_ts: u64,
    ) -> Result<Self> {
        if project_id.is_empty() {
            return Err(AnchorError::InvalidInput("project id must not be empty".into()));
        }
        if record_count < 1 {
            return Err(AnchorError::InvalidInput(
                "record count must be at least 1".into(),
            ));
        }
        let merkle_root: [u8; 32] = merkle_root.try_into().map_err(|_| {
            AnchorError::InvalidInput(format!(
                "merkle root must be {DIGEST_LEN} bytes, got {}",
                merkle_root.len()
            ))
        })?;
        let window = TimeWindow::new(from_ts, to_ts)?;

        Ok(Self {
            project_id: project_id.to_string(),
            merkle_root,
            record_count,
            window,
        })
    }

    /// Application arguments in ledger order.
    pub fn app_args(&self) -> Vec<Vec<u8>> {
        vec![
            ANCHOR_ACTION.to_vec(),
            self.project_id.as_bytes().to_vec(),
            self.merkle_root.to_vec(),
            self.record_count.to_be_bytes().to_vec(),
            self.window.from.to_be_bytes().to_vec(),
            self.window.to.to_be_bytes().to_vec(),
        ]
    }

    /// Parse application arguments back into a payload.
    pub fn from_app_args(args: &[Vec<u8>]) -> Result<Self> {
        let [action, project, root, count, from, to] = args else {
            return Err(AnchorError::InvalidInput(format!(
                "anchor call takes 6 arguments, got {}",
                args.len()
            )));
        };
        if action.as_slice() != ANCHOR_ACTION {
            return Err(AnchorError::InvalidInput("missing anchor action tag".into()));
        }
        let project_id = std::str::from_utf8(project)
            .map_err(|_| AnchorError::InvalidInput("project id is not UTF-8".into()))?;

        Self::new(
            project_id,
            root,
            be_u64(count)?,
            be_u64(from)?,
            be_u64(to)?,
        )
    }
}

fn be_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| AnchorError::InvalidInput(format!("expected 8-byte integer, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// An application-call transaction awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub sender: Address,
    pub app_id: u64,
    pub on_complete: OnComplete,
    pub app_args: Vec<Vec<u8>>,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: [u8; 32],
}

impl UnsignedTransaction {
    fn new(
        sender: Address,
        app_id: u64,
        on_complete: OnComplete,
        app_args: Vec<Vec<u8>>,
        params: &NetworkParams,
    ) -> Self {
        let mut txn = Self {
            sender,
            app_id,
            on_complete,
            app_args,
            fee: params.min_fee,
            first_valid: params.last_round,
            last_valid: params.last_round.saturating_add(VALIDITY_WINDOW),
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash,
        };
        let estimated_size = txn.encode().len() as u64 + SIGNATURE_OVERHEAD;
        txn.fee = params
            .fee_per_byte
            .saturating_mul(estimated_size)
            .max(params.min_fee);
        txn
    }

    /// Canonical field map of the transaction.
    pub fn to_map(&self) -> CanonicalMap {
        let args = self
            .app_args
            .iter()
            .map(|a| MsgValue::Bin(a.clone()))
            .collect();

        CanonicalMap::new()
            .field("apaa", MsgValue::Array(args))
            .field("apan", MsgValue::Uint(self.on_complete.code()))
            .field("apid", MsgValue::Uint(self.app_id))
            .field("fee", MsgValue::Uint(self.fee))
            .field("fv", MsgValue::Uint(self.first_valid))
            .field("gen", MsgValue::Str(self.genesis_id.clone()))
            .field("gh", MsgValue::Bin(self.genesis_hash.to_vec()))
            .field("lv", MsgValue::Uint(self.last_valid))
            .field("snd", MsgValue::Bin(self.sender.public_key().to_vec()))
            .field("type", MsgValue::Str("appl".into()))
    }

    /// Canonical encoding handed to the signer.
    pub fn encode(&self) -> Vec<u8> {
        self.to_map().encode()
    }

    /// The bytes a signer signs: `"TX" || encoding`.
    pub fn bytes_to_sign(&self) -> Vec<u8> {
        let encoded = self.encode();
        let mut out = Vec::with_capacity(2 + encoded.len());
        out.extend_from_slice(b"TX");
        out.extend_from_slice(&encoded);
        out
    }

    /// The id the ledger will assign to this transaction once signed.
    pub fn id(&self) -> String {
        transaction_id(&self.encode())
    }

    /// The anchor payload carried by this transaction, if it is an anchor call.
    pub fn anchor_payload(&self) -> Option<AnchorPayload> {
        match self.on_complete {
            OnComplete::NoOp => AnchorPayload::from_app_args(&self.app_args).ok(),
            OnComplete::OptIn => None,
        }
    }
}

/// Compose an unsigned anchoring transaction.
///
/// Fails with `InvalidInput` when `record_count` is zero, `from_ts > to_ts`,
/// `root` is not 32 bytes or `project_id` is empty.
#[allow(clippy::too_many_arguments)]
pub fn compose_anchor_txn(
    sender: &Address,
    project_id: &str,
    root: &[u8],
    record_count: u64,
    from_ts: u64,
    to_ts: u64,
    params: &NetworkParams,
    app_id: u64,
) -> Result<UnsignedTransaction> {
    let payload = AnchorPayload::new(project_id, root, record_count, from_ts, to_ts)?;
    Ok(compose_payload_txn(sender, &payload, params, app_id))
}

/// Compose an anchoring transaction from an already validated payload.
pub fn compose_payload_txn(
    sender: &Address,
    payload: &AnchorPayload,
    params: &NetworkParams,
    app_id: u64,
) -> UnsignedTransaction {
    UnsignedTransaction::new(*sender, app_id, OnComplete::NoOp, payload.app_args(), params)
}

/// Compose the opt-in call that registers `sender` with the application.
pub fn compose_opt_in_txn(
    sender: &Address,
    params: &NetworkParams,
    app_id: u64,
) -> UnsignedTransaction {
    UnsignedTransaction::new(*sender, app_id, OnComplete::OptIn, Vec::new(), params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NetworkParams {
        NetworkParams {
            fee_per_byte: 0,
            min_fee: 1000,
            last_round: 5000,
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: [0x11; 32],
        }
    }

    fn sender() -> Address {
        Address([0x22; 32])
    }

    #[test]
    fn test_app_args_bit_exact() {
        let root = [0xAB; 32];
        let txn = compose_anchor_txn(&sender(), "proj-1", &root, 3, 100, 200, &params(), 42)
            .unwrap();

        assert_eq!(txn.app_args.len(), 6);
        assert_eq!(txn.app_args[0], b"anchor");
        assert_eq!(txn.app_args[1], b"proj-1");
        assert_eq!(txn.app_args[2], root.to_vec());
        assert_eq!(txn.app_args[3], vec![0, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(txn.app_args[4], vec![0, 0, 0, 0, 0, 0, 0, 100]);
        assert_eq!(txn.app_args[5], vec![0, 0, 0, 0, 0, 0, 0, 200]);
        assert_eq!(txn.app_id, 42);
        assert_eq!(txn.on_complete, OnComplete::NoOp);
    }

    #[test]
    fn test_zero_record_count_rejected() {
        let err = compose_anchor_txn(&sender(), "p", &[0; 32], 0, 1, 2, &params(), 1).unwrap_err();
        assert!(matches!(err, AnchorError::InvalidInput(_)));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = compose_anchor_txn(&sender(), "p", &[0; 32], 1, 3, 2, &params(), 1).unwrap_err();
        assert!(matches!(err, AnchorError::InvalidInput(_)));
    }

    #[test]
    fn test_bad_root_and_project_rejected() {
        assert!(compose_anchor_txn(&sender(), "p", &[0; 31], 1, 1, 2, &params(), 1).is_err());
        assert!(compose_anchor_txn(&sender(), "", &[0; 32], 1, 1, 2, &params(), 1).is_err());
    }

    #[test]
    fn test_network_fields() {
        let txn = compose_anchor_txn(&sender(), "p", &[1; 32], 1, 1, 2, &params(), 9).unwrap();
        assert_eq!(txn.fee, 1000);
        assert_eq!(txn.first_valid, 5000);
        assert_eq!(txn.last_valid, 6000);
        assert_eq!(txn.genesis_id, "testnet-v1.0");
        assert_eq!(txn.sender, sender());
    }

    #[test]
    fn test_fee_scales_with_size() {
        let mut p = params();
        p.fee_per_byte = 10;
        let txn = compose_anchor_txn(&sender(), "p", &[1; 32], 1, 1, 2, &p, 9).unwrap();
        assert!(txn.fee > 1000);
    }

    #[test]
    fn test_hostile_params_saturate() {
        let mut p = params();
        p.last_round = u64::MAX - 10;
        p.fee_per_byte = u64::MAX / 2;
        let txn = compose_anchor_txn(&sender(), "p", &[1; 32], 1, 1, 2, &p, 9).unwrap();
        assert_eq!(txn.first_valid, u64::MAX - 10);
        assert_eq!(txn.last_valid, u64::MAX);
        assert_eq!(txn.fee, u64::MAX);
    }

    #[test]
    fn test_encoding_deterministic_and_canonical() {
        let a = compose_anchor_txn(&sender(), "p", &[1; 32], 1, 1, 2, &params(), 9).unwrap();
        let b = compose_anchor_txn(&sender(), "p", &[1; 32], 1, 1, 2, &params(), 9).unwrap();
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.id(), b.id());

        let map = a.to_map();
        let keys: Vec<&str> = map.keys().collect();
        // apan (NoOp = 0) is omitted.
        assert_eq!(
            keys,
            vec!["apaa", "apid", "fee", "fv", "gen", "gh", "lv", "snd", "type"]
        );
        assert_eq!(&a.bytes_to_sign()[..2], b"TX");
    }

    #[test]
    fn test_payload_round_trip_through_args() {
        let txn = compose_anchor_txn(&sender(), "site-7", &[3; 32], 12, 10, 20, &params(), 9)
            .unwrap();
        let payload = txn.anchor_payload().unwrap();
        assert_eq!(payload.project_id, "site-7");
        assert_eq!(payload.record_count, 12);
        assert_eq!(payload.window, TimeWindow { from: 10, to: 20 });
    }

    #[test]
    fn test_opt_in() {
        let txn = compose_opt_in_txn(&sender(), &params(), 9);
        assert_eq!(txn.on_complete, OnComplete::OptIn);
        assert!(txn.app_args.is_empty());
        assert!(txn.anchor_payload().is_none());
        let map = txn.to_map();
        let keys: Vec<&str> = map.keys().collect();
        assert!(keys.contains(&"apan"));
        assert!(!keys.contains(&"apaa"));
    }
}
