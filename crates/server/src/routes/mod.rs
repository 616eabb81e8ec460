//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness
//! GET  /health/ready           - Readiness (database reachable)
//! GET  /version                - Deployed version
//!
//! # Cards
//! POST /api/send-card          - Store, render and send a release card
//! POST /api/send               - Send a text message or a prebuilt card
//!
//! # Feishu
//! POST /api/feishu/callback    - Card button callbacks
//! POST /jk/feishu/token        - Replace the delegated user token pair
//!
//! # OA
//! POST /api/store-json         - OA approval webhook
//! GET  /api/get-json/{id}      - One stored OA record
//! GET  /api/get-json-all       - All stored OA records
//! GET  /api/get-latest-json    - Newest stored OA record
//! POST /api/oa/test-flow       - Process the newest record with progress messages
//! ```

pub mod cards;
pub mod feishu;
pub mod oa;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;

use crate::error::ApiResponse;
use crate::state::AppState;

/// Create all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/version", get(version))
        .merge(cards::router())
        .merge(feishu::router())
        .merge(oa::router())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn version(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::success(json!({ "version": state.config().version }))
}
