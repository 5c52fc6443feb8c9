/// REST API routes for anchoring.
///
/// The server composes unsigned transactions and relays signed ones. It
/// never sees a private key: signing happens in the caller's wallet
/// between `prepare` and `submit`.
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::AppState;
use crate::anchor::{Anchor, TimeWindow};
use crate::error::AnchorError;
use crate::ledger::Address;
use crate::merkle::{parse_digest, InclusionProof};

/// Error body returned by every failing route.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error kind.
    pub kind: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status for each error kind.
pub fn status_for(err: &AnchorError) -> StatusCode {
    match err {
        AnchorError::InvalidInput(_) | AnchorError::IndexOutOfRange { .. } => {
            StatusCode::BAD_REQUEST
        }
        AnchorError::NotFound(_) => StatusCode::NOT_FOUND,
        AnchorError::NetworkRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnchorError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AnchorError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AnchorError::Network(_) | AnchorError::StateDecode(_) => StatusCode::BAD_GATEWAY,
        AnchorError::Serialization(_) | AnchorError::Config(_) | AnchorError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_error(err: AnchorError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, kind = err.kind(), "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind(),
        }),
    )
}

fn parse_sender(text: &str) -> Result<Address, ApiError> {
    text.parse::<Address>().map_err(api_error)
}

// ─── Health ──────────────────────────────────────────────

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Anchoring ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareRequest {
    sender_address: String,
    project_id: String,
    data_items: Vec<Value>,
    from_timestamp: Option<u64>,
    to_timestamp: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    /// Base64 of the canonical unsigned transaction.
    transaction: String,
    tx_id: String,
    merkle_root: String,
    record_count: u64,
    from_timestamp: u64,
    to_timestamp: u64,
}

/// POST /api/anchor/prepare: Build the root and the unsigned anchor transaction.
async fn prepare(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>, ApiError> {
    let sender = parse_sender(&req.sender_address)?;
    let window = match (req.from_timestamp, req.to_timestamp) {
        (None, None) => None,
        (Some(from), Some(to)) => Some(TimeWindow::new(from, to).map_err(api_error)?),
        _ => {
            return Err(api_error(AnchorError::InvalidInput(
                "fromTimestamp and toTimestamp must be given together".into(),
            )))
        }
    };

    let prepared = state
        .service
        .prepare(&sender, &req.project_id, &req.data_items, window)
        .await
        .map_err(api_error)?;

    Ok(Json(PrepareResponse {
        transaction: STANDARD.encode(&prepared.encoded),
        tx_id: prepared.tx_id,
        merkle_root: hex::encode(prepared.root),
        record_count: prepared.record_count,
        from_timestamp: prepared.window.from,
        to_timestamp: prepared.window.to,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptInRequest {
    sender_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OptInResponse {
    transaction: String,
    tx_id: String,
}

/// POST /api/anchor/opt-in: Unsigned opt-in transaction for a sender.
async fn opt_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptInRequest>,
) -> Result<Json<OptInResponse>, ApiError> {
    let sender = parse_sender(&req.sender_address)?;
    let prepared = state
        .service
        .prepare_opt_in(&sender)
        .await
        .map_err(api_error)?;

    Ok(Json(OptInResponse {
        transaction: STANDARD.encode(&prepared.encoded),
        tx_id: prepared.tx_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    /// Base64 of the signed transaction.
    signed_transaction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_id: String,
    confirmed_round: u64,
    anchor_index: Option<u64>,
    explorer_url: String,
}

/// POST /api/anchor/submit: Relay a signed transaction and wait for confirmation.
async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let signed = STANDARD.decode(req.signed_transaction.trim()).map_err(|e| {
        api_error(AnchorError::InvalidInput(format!(
            "signedTransaction is not base64: {e}"
        )))
    })?;

    let cancel = state.shutdown.child_token();
    let submission = state
        .service
        .submit(&signed, &cancel)
        .await
        .map_err(api_error)?;

    Ok(Json(SubmitResponse {
        explorer_url: state.service.explorer_tx_url(&submission.tx_id),
        tx_id: submission.tx_id,
        confirmed_round: submission.confirmed_round,
        anchor_index: submission.anchor_index,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQuery {
    anchor_index: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    app_id: u64,
    anchor_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    anchor: Option<Anchor>,
    explorer_url: String,
}

/// GET /api/anchor/state: Anchor count, or one anchor with `?anchorIndex=n`.
async fn anchor_state(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateResponse>, ApiError> {
    let anchor_count = state.service.get_anchor_count().await.map_err(api_error)?;
    let anchor = match query.anchor_index {
        Some(index) => Some(state.service.get_anchor(index).await.map_err(api_error)?),
        None => None,
    };

    Ok(Json(StateResponse {
        app_id: state.service.app_id(),
        anchor_count,
        anchor,
        explorer_url: state.service.explorer_app_url(),
    }))
}

#[derive(Debug, Serialize)]
struct AnchorsResponse {
    anchors: Vec<Anchor>,
}

/// GET /api/anchors: Every anchor in confirmation order.
async fn list_anchors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AnchorsResponse>, ApiError> {
    let anchors = state.service.list_anchors().await.map_err(api_error)?;
    Ok(Json(AnchorsResponse { anchors }))
}

pub fn anchor_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/anchor/prepare", post(prepare))
        .route("/api/anchor/opt-in", post(opt_in))
        .route("/api/anchor/submit", post(submit))
        .route("/api/anchor/state", get(anchor_state))
        .route("/api/anchors", get(list_anchors))
}

// ─── Proofs ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProofRequest {
    data_items: Vec<Value>,
    index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofResponse {
    merkle_root: String,
    proof: InclusionProof,
}

/// POST /api/anchor/proof: Inclusion proof for one record of a batch.
async fn proof(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProofRequest>,
) -> Result<Json<ProofResponse>, ApiError> {
    let (root, proof) = state
        .service
        .prove_membership(&req.data_items, req.index)
        .map_err(api_error)?;

    Ok(Json(ProofResponse {
        merkle_root: hex::encode(root),
        proof,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    record: Value,
    proof: InclusionProof,
    /// Hex root to check against. Ignored when `anchorIndex` is given.
    merkle_root: Option<String>,
    /// Verify against this confirmed anchor, including its record count.
    anchor_index: Option<u64>,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    included: bool,
}

/// POST /api/anchor/verify: Check a record against a root or an anchor.
async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let included = match (req.anchor_index, req.merkle_root) {
        (Some(index), _) => state
            .service
            .verify_against_anchor(&req.record, &req.proof, index)
            .await
            .map_err(api_error)?,
        (None, Some(root)) => {
            let root = parse_digest(&root).map_err(api_error)?;
            state.service.verify_membership(&req.record, &req.proof, &root)
        }
        (None, None) => {
            return Err(api_error(AnchorError::InvalidInput(
                "either merkleRoot or anchorIndex is required".into(),
            )))
        }
    };

    Ok(Json(VerifyResponse { included }))
}

pub fn proof_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/anchor/proof", post(proof))
        .route("/api/anchor/verify", post(verify))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::submit::ConfirmationPolicy;
    use crate::ledger::InMemoryLedger;
    use crate::service::AnchorService;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    const OWNER: Address = Address([8; 32]);

    fn app_state() -> (Arc<InMemoryLedger>, Arc<AppState>) {
        let ledger = Arc::new(InMemoryLedger::new(31, OWNER));
        let service = AnchorService::new(ledger.clone(), 31, ConfirmationPolicy::default());
        let state = Arc::new(AppState {
            service: Arc::new(service),
            shutdown: CancellationToken::new(),
        });
        (ledger, state)
    }

    fn prepare_request(items: Vec<Value>) -> PrepareRequest {
        PrepareRequest {
            sender_address: OWNER.to_string(),
            project_id: "seagrass-survey".into(),
            data_items: items,
            from_timestamp: Some(1_000),
            to_timestamp: Some(2_000),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AnchorError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AnchorError::NotFound(3)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&AnchorError::NetworkRejected("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AnchorError::ConfirmationTimeout {
                tx_id: "T".into(),
                rounds: 4
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&AnchorError::Network("x".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_prepare_sign_submit_read() {
        let (ledger, state) = app_state();

        let Json(prepared) = prepare(
            State(state.clone()),
            Json(prepare_request(vec![json!({"salinity": 31.2}), json!({"salinity": 30.8})])),
        )
        .await
        .unwrap();
        assert_eq!(prepared.record_count, 2);
        assert_eq!(prepared.from_timestamp, 1_000);

        // The wallet signs what prepare produced.
        let txn = state
            .service
            .prepare(
                &OWNER,
                "seagrass-survey",
                &[json!({"salinity": 31.2}), json!({"salinity": 30.8})],
                Some(TimeWindow::new(1_000, 2_000).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(STANDARD.encode(&txn.encoded), prepared.transaction);
        let signed = ledger.sign(&txn.unsigned_txn);

        let Json(submitted) = submit(
            State(state.clone()),
            Json(SubmitRequest {
                signed_transaction: STANDARD.encode(signed),
            }),
        )
        .await
        .unwrap();
        assert_eq!(submitted.tx_id, prepared.tx_id);
        assert_eq!(submitted.anchor_index, Some(0));
        assert!(submitted.explorer_url.ends_with(&prepared.tx_id));

        let Json(read) = anchor_state(
            State(state.clone()),
            Query(StateQuery {
                anchor_index: Some(0),
            }),
        )
        .await
        .unwrap();
        assert_eq!(read.anchor_count, 1);
        let anchor = read.anchor.unwrap();
        assert_eq!(hex::encode(anchor.merkle_root), prepared.merkle_root);
        assert_eq!(anchor.project_id, "seagrass-survey");
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_input() {
        let (_, state) = app_state();

        let (status, _) = prepare(State(state.clone()), Json(prepare_request(vec![])))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut req = prepare_request(vec![json!(1)]);
        req.sender_address = "not-an-address".into();
        let (status, _) = prepare(State(state.clone()), Json(req)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut req = prepare_request(vec![json!(1)]);
        req.to_timestamp = None;
        let (status, _) = prepare(State(state), Json(req)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_anchor_beyond_count_is_404() {
        let (_, state) = app_state();
        let (status, Json(body)) = anchor_state(
            State(state),
            Query(StateQuery {
                anchor_index: Some(0),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.kind, "not_found");
    }

    #[tokio::test]
    async fn test_submit_garbage_is_rejected() {
        let (_, state) = app_state();
        let (status, _) = submit(
            State(state.clone()),
            Json(SubmitRequest {
                signed_transaction: "%%%".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, Json(body)) = submit(
            State(state),
            Json(SubmitRequest {
                signed_transaction: STANDARD.encode(b"unsigned"),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.kind, "network_rejected");
    }

    #[tokio::test]
    async fn test_proof_then_verify() {
        let (_, state) = app_state();
        let items = vec![json!("a"), json!("b"), json!("c")];

        let Json(proved) = proof(
            State(state.clone()),
            Json(ProofRequest {
                data_items: items,
                index: 1,
            }),
        )
        .await
        .unwrap();

        let Json(result) = verify(
            State(state.clone()),
            Json(VerifyRequest {
                record: json!("b"),
                proof: proved.proof.clone(),
                merkle_root: Some(proved.merkle_root.clone()),
                anchor_index: None,
            }),
        )
        .await
        .unwrap();
        assert!(result.included);

        let Json(result) = verify(
            State(state),
            Json(VerifyRequest {
                record: json!("z"),
                proof: proved.proof,
                merkle_root: Some(proved.merkle_root),
                anchor_index: None,
            }),
        )
        .await
        .unwrap();
        assert!(!result.included);
    }
}
