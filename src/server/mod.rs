/// HTTP API for anchoring.
///
/// A thin routing layer over `AnchorService`:
/// - prepares unsigned anchor and opt-in transactions
/// - relays signed transactions and reports confirmation
/// - reads anchors back from the ledger
///
/// Proof generation and verification are also exposed so that clients
/// without a Merkle implementation can check records.
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AnchorError, Result};
use crate::service::AnchorService;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnchorService>,
    /// Cancelled on shutdown; submissions waiting for confirmation stop
    /// polling.
    pub shutdown: CancellationToken,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::anchor_routes())
        .merge(routes::proof_routes())
        .with_state(Arc::new(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server. Returns once `state.shutdown` is cancelled and
/// in-flight requests have drained.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AnchorError::Io)?;

    tracing::info!("blueblock-anchor API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(AnchorError::Io)?;

    Ok(())
}
