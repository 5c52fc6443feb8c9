/// algod REST client.
///
/// Talks to a ledger node's v2 REST API. State and transaction bodies come
/// back as JSON with base64-encoded keys and byte values; every such value
/// is decoded into the typed `StateValue` here, and an entry with an
/// unknown type tag is an error rather than a guess.
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{LedgerClient, NetworkParams, PendingTransaction, StateEntry, StateValue};
use crate::error::{AnchorError, Result};

/// Public testnet node used when no endpoint is configured.
pub const DEFAULT_ALGOD_URL: &str = "https://testnet-api.algonode.cloud";

/// Per-request deadline used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const TOKEN_HEADER: &str = "X-Algo-API-Token";

/// Configuration for an algod endpoint.
#[derive(Debug, Clone)]
pub struct AlgodConfig {
    /// Base URL, without the `/v2` suffix.
    pub url: String,
    /// API token; empty for public nodes.
    pub token: String,
    /// Deadline for each request, connect through body.
    pub timeout: Duration,
}

impl Default for AlgodConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ALGOD_URL.to_string(),
            token: String::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// algod REST implementation of `LedgerClient`.
pub struct AlgodClient {
    client: Client,
    config: AlgodConfig,
}

/// Error body returned by algod on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TransactionParams {
    fee: u64,
    min_fee: u64,
    last_round: u64,
    genesis_id: String,
    genesis_hash: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PendingResponse {
    #[serde(default)]
    confirmed_round: Option<u64>,
    #[serde(default)]
    pool_error: String,
    #[serde(default)]
    global_state_delta: Vec<RawDelta>,
}

#[derive(Debug, Deserialize)]
struct RawDelta {
    key: String,
    value: RawDeltaValue,
}

#[derive(Debug, Deserialize)]
struct RawDeltaValue {
    action: u8,
    #[serde(default)]
    bytes: Option<String>,
    #[serde(default)]
    uint: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApplicationResponse {
    params: ApplicationParams,
}

#[derive(Debug, Deserialize)]
struct ApplicationParams {
    #[serde(rename = "global-state", default)]
    global_state: Vec<RawStateEntry>,
}

#[derive(Debug, Deserialize)]
struct RawStateEntry {
    key: String,
    value: RawStateValue,
}

#[derive(Debug, Deserialize)]
struct RawStateValue {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    bytes: String,
    #[serde(default)]
    uint: u64,
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| AnchorError::StateDecode(format!("{field} is not base64: {e}")))
}

impl RawStateEntry {
    fn into_entry(self) -> Result<StateEntry> {
        let key = decode_b64("state key", &self.key)?;
        let value = match self.value.kind {
            1 => StateValue::Bytes(decode_b64("state bytes", &self.value.bytes)?),
            2 => StateValue::Uint(self.value.uint),
            other => {
                return Err(AnchorError::StateDecode(format!(
                    "unknown state value type {other} for key {}",
                    String::from_utf8_lossy(&key)
                )))
            }
        };
        Ok(StateEntry { key, value })
    }
}

impl RawDelta {
    /// Deletions (action 3) carry no value and are skipped.
    fn into_entry(self) -> Result<Option<StateEntry>> {
        let key = decode_b64("delta key", &self.key)?;
        let value = match (self.value.action, self.value.bytes, self.value.uint) {
            (1, Some(bytes), _) => StateValue::Bytes(decode_b64("delta bytes", &bytes)?),
            (1, None, _) => StateValue::Bytes(Vec::new()),
            (2, _, uint) => StateValue::Uint(uint.unwrap_or(0)),
            (3, _, _) => return Ok(None),
            (other, _, _) => {
                return Err(AnchorError::StateDecode(format!(
                    "unknown state delta action {other}"
                )))
            }
        };
        Ok(Some(StateEntry { key, value }))
    }
}

impl AlgodClient {
    pub fn new(config: AlgodConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnchorError::Config(format!("cannot build algod client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2{}", self.config.url.trim_end_matches('/'), path)
    }

    fn with_token(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.token.is_empty() {
            req
        } else {
            req.header(TOKEN_HEADER, &self.config.token)
        }
    }

    /// Read a JSON body, turning non-2xx statuses into errors built by `on_error`.
    async fn read_json<T: DeserializeOwned>(
        resp: Response,
        on_error: impl FnOnce(StatusCode, String) -> AnchorError,
    ) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);
            return Err(on_error(status, message));
        }

        resp.json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("algod response parse error: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "algod GET");
        let resp = self
            .with_token(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?;

        Self::read_json(resp, |status, message| {
            AnchorError::Network(format!("algod {path} returned {status}: {message}"))
        })
        .await
    }
}

#[async_trait]
impl LedgerClient for AlgodClient {
    fn name(&self) -> &str {
        "algod"
    }

    async fn suggested_params(&self) -> Result<NetworkParams> {
        let raw: TransactionParams = self.get_json("/transactions/params").await?;
        let genesis_hash: [u8; 32] = decode_b64("genesis-hash", &raw.genesis_hash)?
            .try_into()
            .map_err(|_| AnchorError::StateDecode("genesis-hash must be 32 bytes".into()))?;

        Ok(NetworkParams {
            fee_per_byte: raw.fee,
            min_fee: raw.min_fee,
            last_round: raw.last_round,
            genesis_id: raw.genesis_id,
            genesis_hash,
        })
    }

    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String> {
        let resp = self
            .with_token(self.client.post(self.url("/transactions")))
            .header(CONTENT_TYPE, "application/x-binary")
            .body(signed.to_vec())
            .send()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?;

        let sent: SendResponse = Self::read_json(resp, |status, message| {
            // 4xx means the node looked at the transaction and refused it.
            if status.is_client_error() {
                AnchorError::NetworkRejected(message)
            } else {
                AnchorError::Network(format!("algod returned {status}: {message}"))
            }
        })
        .await?;

        Ok(sent.tx_id)
    }

    async fn pending_transaction(&self, tx_id: &str) -> Result<PendingTransaction> {
        let raw: PendingResponse = self
            .get_json(&format!("/transactions/pending/{tx_id}"))
            .await?;

        if !raw.pool_error.is_empty() {
            return Ok(PendingTransaction::Rejected(raw.pool_error));
        }

        match raw.confirmed_round {
            Some(round) if round > 0 => {
                let global_delta = raw
                    .global_state_delta
                    .into_iter()
                    .filter_map(|d| d.into_entry().transpose())
                    .collect::<Result<Vec<_>>>()?;
                Ok(PendingTransaction::Confirmed {
                    round,
                    global_delta,
                })
            }
            _ => Ok(PendingTransaction::Pending),
        }
    }

    async fn application_state(&self, app_id: u64) -> Result<Vec<StateEntry>> {
        let raw: ApplicationResponse = self.get_json(&format!("/applications/{app_id}")).await?;
        raw.params
            .global_state
            .into_iter()
            .map(RawStateEntry::into_entry)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_entry_decoding() {
        let raw: RawStateEntry = serde_json::from_value(serde_json::json!({
            "key": STANDARD.encode(b"anchor_count"),
            "value": {"type": 2, "bytes": "", "uint": 3}
        }))
        .unwrap();
        let entry = raw.into_entry().unwrap();
        assert_eq!(entry.key, b"anchor_count");
        assert_eq!(entry.value, StateValue::Uint(3));

        let raw: RawStateEntry = serde_json::from_value(serde_json::json!({
            "key": STANDARD.encode(b"owner"),
            "value": {"type": 1, "bytes": STANDARD.encode([9u8; 4]), "uint": 0}
        }))
        .unwrap();
        assert_eq!(raw.into_entry().unwrap().value, StateValue::Bytes(vec![9; 4]));
    }

    #[test]
    fn test_unknown_state_type_fails_loudly() {
        let raw: RawStateEntry = serde_json::from_value(serde_json::json!({
            "key": STANDARD.encode(b"weird"),
            "value": {"type": 7}
        }))
        .unwrap();
        assert!(matches!(raw.into_entry(), Err(AnchorError::StateDecode(_))));
    }

    #[test]
    fn test_delta_decoding() {
        let uint: RawDelta = serde_json::from_value(serde_json::json!({
            "key": STANDARD.encode(b"anchor_count"),
            "value": {"action": 2, "uint": 5}
        }))
        .unwrap();
        assert_eq!(
            uint.into_entry().unwrap().unwrap().value,
            StateValue::Uint(5)
        );

        let deleted: RawDelta = serde_json::from_value(serde_json::json!({
            "key": STANDARD.encode(b"gone"),
            "value": {"action": 3}
        }))
        .unwrap();
        assert!(deleted.into_entry().unwrap().is_none());
    }

    #[test]
    fn test_pending_response_shapes() {
        let pending: PendingResponse =
            serde_json::from_value(serde_json::json!({"pool-error": "", "confirmed-round": 0}))
                .unwrap();
        assert_eq!(pending.confirmed_round, Some(0));
        assert!(pending.global_state_delta.is_empty());

        let rejected: PendingResponse =
            serde_json::from_value(serde_json::json!({"pool-error": "fee too small"})).unwrap();
        assert_eq!(rejected.pool_error, "fee too small");
    }

    #[test]
    fn test_url_building() {
        let client = AlgodClient::new(AlgodConfig {
            url: "http://localhost:4001/".into(),
            token: "a".repeat(64),
            ..AlgodConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("/transactions/params"),
            "http://localhost:4001/v2/transactions/params"
        );
    }

    #[tokio::test]
    async fn test_unresponsive_node_times_out() {
        // Accepts the connection, never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = AlgodClient::new(AlgodConfig {
            url: format!("http://{addr}"),
            token: String::new(),
            timeout: Duration::from_millis(200),
        })
        .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            client.pending_transaction("TXID"),
        )
        .await
        .expect("request must give up on its own");
        assert!(matches!(outcome, Err(AnchorError::Network(_))));
    }
}
