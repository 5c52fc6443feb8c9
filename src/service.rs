/// Anchoring service.
///
/// Ties the pieces together for the outer surfaces (HTTP server, CLI):
/// 1. Hash a batch of records into a Merkle root
/// 2. Compose the unsigned anchor transaction for an external signer
/// 3. Relay the signed transaction and wait for confirmation
/// 4. Read anchors back from ledger state
/// 5. Prove and verify record membership
///
/// The service never holds keys. Signing happens outside, between steps 2
/// and 3.
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::anchor::compose::{compose_opt_in_txn, compose_payload_txn, AnchorPayload, UnsignedTransaction};
use crate::anchor::state::AnchorStateReader;
use crate::anchor::submit::{ConfirmationPolicy, Submission, Submitter};
use crate::anchor::{verify_for_anchor, Anchor, TimeWindow, DEFAULT_WINDOW_SECS};
use crate::config::Network;
use crate::error::Result;
use crate::ledger::{Address, LedgerClient, StateEntry};
use crate::merkle::{self, batch_bytes, InclusionProof, MerkleTree};

/// An anchor transaction ready for signing.
#[derive(Debug, Clone)]
pub struct PreparedAnchor {
    pub unsigned_txn: UnsignedTransaction,
    /// Canonical encoding to hand to the signer.
    pub encoded: Vec<u8>,
    pub tx_id: String,
    pub root: [u8; 32],
    pub record_count: u64,
    pub window: TimeWindow,
}

/// An opt-in transaction ready for signing.
#[derive(Debug, Clone)]
pub struct PreparedOptIn {
    pub unsigned_txn: UnsignedTransaction,
    pub encoded: Vec<u8>,
    pub tx_id: String,
}

/// Entry point for anchoring operations against one application.
pub struct AnchorService {
    ledger: Arc<dyn LedgerClient>,
    app_id: u64,
    network: Network,
    default_window_secs: u64,
    submitter: Submitter,
    reader: AnchorStateReader,
}

impl AnchorService {
    pub fn new(ledger: Arc<dyn LedgerClient>, app_id: u64, policy: ConfirmationPolicy) -> Self {
        Self {
            submitter: Submitter::new(ledger.clone(), policy),
            reader: AnchorStateReader::new(ledger.clone(), app_id),
            ledger,
            app_id,
            network: Network::default(),
            default_window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_default_window(mut self, secs: u64) -> Self {
        self.default_window_secs = secs;
        self
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Build the Merkle root of `records` and compose its anchor transaction.
    ///
    /// Without a `window`, the batch is taken to cover the default window
    /// ending now.
    pub async fn prepare<T: Serialize>(
        &self,
        sender: &Address,
        project_id: &str,
        records: &[T],
        window: Option<TimeWindow>,
    ) -> Result<PreparedAnchor> {
        let tree = MerkleTree::from_leaves(&batch_bytes(records)?)?;
        let root = tree.root();
        let record_count = tree.leaf_count() as u64;
        let window = window.unwrap_or_else(|| {
            TimeWindow::ending_at(Utc::now().timestamp().max(0) as u64, self.default_window_secs)
        });

        let payload = AnchorPayload::new(project_id, &root, record_count, window.from, window.to)?;
        let params = self.ledger.suggested_params().await?;
        let unsigned_txn = compose_payload_txn(sender, &payload, &params, self.app_id);
        let encoded = unsigned_txn.encode();
        let tx_id = unsigned_txn.id();

        info!(
            tx_id = %tx_id,
            project_id,
            record_count,
            root = %hex::encode(root),
            "Prepared anchor transaction"
        );

        Ok(PreparedAnchor {
            unsigned_txn,
            encoded,
            tx_id,
            root,
            record_count,
            window,
        })
    }

    /// Compose the opt-in call that registers `sender` with the application.
    pub async fn prepare_opt_in(&self, sender: &Address) -> Result<PreparedOptIn> {
        let params = self.ledger.suggested_params().await?;
        let unsigned_txn = compose_opt_in_txn(sender, &params, self.app_id);
        Ok(PreparedOptIn {
            encoded: unsigned_txn.encode(),
            tx_id: unsigned_txn.id(),
            unsigned_txn,
        })
    }

    /// Relay a signed transaction and wait for confirmation.
    pub async fn submit(&self, signed: &[u8], cancel: &CancellationToken) -> Result<Submission> {
        self.submitter.submit(signed, cancel).await
    }

    pub async fn get_anchor_count(&self) -> Result<u64> {
        self.reader.read_anchor_count().await
    }

    pub async fn get_anchor(&self, index: u64) -> Result<Anchor> {
        self.reader.read_anchor(index).await
    }

    pub async fn list_anchors(&self) -> Result<Vec<Anchor>> {
        self.reader.list_anchors().await
    }

    pub async fn raw_state(&self) -> Result<Vec<StateEntry>> {
        self.reader.raw_state().await
    }

    /// Root of `records` and the inclusion proof for `records[index]`.
    pub fn prove_membership<T: Serialize>(
        &self,
        records: &[T],
        index: usize,
    ) -> Result<([u8; 32], InclusionProof)> {
        let tree = MerkleTree::from_leaves(&batch_bytes(records)?)?;
        Ok((tree.root(), tree.prove(index)?))
    }

    /// Check `record` against a root the caller obtained elsewhere.
    pub fn verify_membership<T: Serialize>(
        &self,
        record: &T,
        proof: &InclusionProof,
        claimed_root: &[u8; 32],
    ) -> bool {
        match merkle::record_leaf(record) {
            Ok(leaf) => merkle::verify(&leaf, proof, claimed_root),
            Err(_) => false,
        }
    }

    /// Check `record` against the confirmed anchor at `index`, including its
    /// record count.
    pub async fn verify_against_anchor<T: Serialize>(
        &self,
        record: &T,
        proof: &InclusionProof,
        index: u64,
    ) -> Result<bool> {
        let anchor = self.get_anchor(index).await?;
        Ok(verify_for_anchor(record, proof, &anchor))
    }

    pub fn explorer_tx_url(&self, tx_id: &str) -> String {
        format!("{}/tx/{tx_id}", self.network.explorer_base())
    }

    pub fn explorer_app_url(&self) -> String {
        format!("{}/application/{}", self.network.explorer_base(), self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::AnchorError;
    use crate::ledger::memory::ConfirmBehavior;
    use crate::ledger::InMemoryLedger;
    use crate::merkle::prove;
    use serde_json::{json, Value};

    const APP_ID: u64 = 1001;
    const OWNER: Address = Address([0x5a; 32]);

    fn service() -> (Arc<InMemoryLedger>, AnchorService) {
        let ledger = Arc::new(InMemoryLedger::new(55, Address([4; 32])));
        let service = AnchorService::new(ledger.clone(), 55, ConfirmationPolicy::default());
        (ledger, service)
    }

    fn setup(policy: ConfirmationPolicy) -> (Arc<InMemoryLedger>, AnchorService) {
        let ledger = Arc::new(InMemoryLedger::new(APP_ID, OWNER));
        let service = AnchorService::new(ledger.clone(), APP_ID, policy);
        (ledger, service)
    }

    fn readings(n: usize, offset: i64) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "sensor": format!("buoy-{}", i % 3),
                    "ph": 8.0 + (i as f64) / 100.0,
                    "ts": 1_700_000_000 + offset + i as i64,
                })
            })
            .collect()
    }

    async fn anchor_batch(
        ledger: &InMemoryLedger,
        service: &AnchorService,
        project: &str,
        records: &[Value],
        window: TimeWindow,
    ) -> u64 {
        let prepared = service
            .prepare(&OWNER, project, records, Some(window))
            .await
            .unwrap();
        let signed = ledger.sign(&prepared.unsigned_txn);
        let submission = service
            .submit(&signed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(submission.tx_id, prepared.tx_id);
        submission.anchor_index.unwrap()
    }

    #[tokio::test]
    async fn test_prepare_defaults_window_to_last_day() {
        let (_, service) = service();
        let prepared = service
            .prepare(&Address([4; 32]), "p", &[json!({"a": 1})], None)
            .await
            .unwrap();
        assert_eq!(prepared.window.to - prepared.window.from, DEFAULT_WINDOW_SECS);
        assert_eq!(prepared.record_count, 1);
        assert_eq!(prepared.encoded, prepared.unsigned_txn.encode());
        assert_eq!(prepared.tx_id, prepared.unsigned_txn.id());
    }

    #[tokio::test]
    async fn test_prepare_empty_batch_rejected() {
        let (_, service) = service();
        let records: Vec<serde_json::Value> = vec![];
        let err = service
            .prepare(&Address([4; 32]), "p", &records, None)
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_prove_and_verify_membership() {
        let (_, service) = service();
        let records = vec![json!("a"), json!("b"), json!("c")];
        let (root, proof) = service.prove_membership(&records, 2).unwrap();
        assert!(service.verify_membership(&json!("c"), &proof, &root));
        assert!(!service.verify_membership(&json!("b"), &proof, &root));
        assert!(service.prove_membership(&records, 3).is_err());
    }

    #[tokio::test]
    async fn test_raw_state_sorted() {
        let (_, service) = service();
        let entries = service.raw_state().await.unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"anchor_count"[..], &b"owner"[..]]);
    }

    #[test]
    fn test_explorer_urls() {
        let (_, service) = service();
        assert_eq!(
            service.explorer_tx_url("ABC"),
            "https://testnet.explorer.perawallet.app/tx/ABC"
        );
        let service = service.with_network(Network::Mainnet);
        assert_eq!(
            service.explorer_app_url(),
            "https://explorer.perawallet.app/application/55"
        );
    }

    #[tokio::test]
    async fn test_anchor_read_back_and_verify() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        let records = readings(7, 0);
        let window = TimeWindow::new(1_700_000_000, 1_700_003_600).unwrap();

        let index = anchor_batch(&ledger, &service, "reef-monitoring", &records, window).await;
        assert_eq!(index, 0);
        assert_eq!(service.get_anchor_count().await.unwrap(), 1);

        let anchor = service.get_anchor(0).await.unwrap();
        assert_eq!(anchor.project_id, "reef-monitoring");
        assert_eq!(anchor.record_count, 7);
        assert_eq!(anchor.window, window);
        assert!(anchor.confirmed_at > 0);

        let (root, _) = service.prove_membership(&records, 0).unwrap();
        assert_eq!(anchor.merkle_root, root);

        for (i, record) in records.iter().enumerate() {
            let (_, proof) = service.prove_membership(&records, i).unwrap();
            assert!(verify_for_anchor(record, &proof, &anchor));
            assert!(service.verify_against_anchor(record, &proof, 0).await.unwrap());
        }

        let (_, proof) = service.prove_membership(&records, 3).unwrap();
        let mut tampered = records[3].clone();
        tampered["ph"] = json!(6.5);
        assert!(!verify_for_anchor(&tampered, &proof, &anchor));
    }

    #[tokio::test]
    async fn test_indices_follow_confirmation_order() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        let window = TimeWindow::new(10, 20).unwrap();

        for expected in 0..3u64 {
            let records = readings(2 + expected as usize, expected as i64 * 100);
            let index = anchor_batch(&ledger, &service, "kelp", &records, window).await;
            assert_eq!(index, expected);
        }

        let anchors = service.list_anchors().await.unwrap();
        assert_eq!(anchors.len(), 3);
        for (i, anchor) in anchors.iter().enumerate() {
            assert_eq!(anchor.index, i as u64);
            assert_eq!(anchor.record_count, 2 + i as u64);
        }
    }

    #[tokio::test]
    async fn test_anchor_at_count_is_not_found() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        assert!(matches!(
            service.get_anchor(0).await,
            Err(AnchorError::NotFound(0))
        ));

        let window = TimeWindow::new(1, 2).unwrap();
        anchor_batch(&ledger, &service, "p", &readings(1, 0), window).await;

        let count = service.get_anchor_count().await.unwrap();
        assert_eq!(count, 1);
        assert!(matches!(
            service.get_anchor(count).await,
            Err(AnchorError::NotFound(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_submission_times_out() {
        let policy = ConfirmationPolicy {
            max_rounds: 4,
            poll_interval: Duration::from_secs(1),
        };
        let (ledger, service) = setup(policy);
        ledger.set_behavior(ConfirmBehavior::Never);

        let prepared = service
            .prepare(&OWNER, "p", &readings(2, 0), None)
            .await
            .unwrap();
        let err = service
            .submit(&ledger.sign(&prepared.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnchorError::ConfirmationTimeout { ref tx_id, rounds: 4 } if *tx_id == prepared.tx_id
        ));
        assert_eq!(service.get_anchor_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_confirmation_within_patience() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        ledger.set_behavior(ConfirmBehavior::AfterPolls(3));

        let prepared = service
            .prepare(&OWNER, "p", &readings(2, 0), None)
            .await
            .unwrap();
        let submission = service
            .submit(&ledger.sign(&prepared.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(submission.anchor_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_transaction_is_rejected() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        ledger.set_behavior(ConfirmBehavior::Drop("overspend".into()));

        let prepared = service
            .prepare(&OWNER, "p", &readings(2, 0), None)
            .await
            .unwrap();
        let err = service
            .submit(&ledger.sign(&prepared.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::NetworkRejected(ref r) if r == "overspend"));
    }

    #[tokio::test]
    async fn test_unapproved_sender_needs_opt_in_and_approval() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        let member = Address([0x33; 32]);
        let records = readings(3, 0);

        let prepared = service.prepare(&member, "p", &records, None).await.unwrap();
        let err = service
            .submit(&ledger.sign(&prepared.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::NetworkRejected(_)));

        let opt_in = service.prepare_opt_in(&member).await.unwrap();
        service
            .submit(&ledger.sign(&opt_in.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap();
        ledger.approve(member);

        // Rounds moved on; compose against fresh parameters.
        let prepared = service.prepare(&member, "p", &records, None).await.unwrap();
        let submission = service
            .submit(&ledger.sign(&prepared.unsigned_txn), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(submission.anchor_index, Some(0));
    }

    #[tokio::test]
    async fn test_padded_batch_proof_refused_by_anchor() {
        let (ledger, service) = setup(ConfirmationPolicy::default());
        let records = vec![json!("a"), json!("b"), json!("c")];
        let window = TimeWindow::new(1, 2).unwrap();
        anchor_batch(&ledger, &service, "p", &records, window).await;
        let anchor = service.get_anchor(0).await.unwrap();

        let padded = batch_bytes(&[json!("a"), json!("b"), json!("c"), json!("c")]).unwrap();
        let proof = prove(&padded, 3).unwrap();
        assert!(!verify_for_anchor(&json!("c"), &proof, &anchor));
    }
}
