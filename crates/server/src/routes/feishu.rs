//! Feishu card callbacks and delegated token updates.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::error::{ApiResponse, AppError};
use crate::feishu::{ButtonValue, CallbackEnvelope};
use crate::state::AppState;

const CARD_ACTION_EVENT: &str = "card.action.trigger";

/// Tokens pushed by an operator lack an expiry; Feishu issues them for two
/// hours.
const PUSHED_TOKEN_TTL_SECS: i64 = 7200;

/// Create Feishu routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/feishu/callback", post(handle_callback))
        .route("/jk/feishu/token", post(update_token))
}

/// Handle a card callback.
///
/// Answers URL verification challenges, checks the verification token and
/// (when an encrypt key is configured) the request signature, then hands
/// `card.action.trigger` events to the callback state machine.
#[instrument(skip(state, headers, body))]
async fn handle_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    let feishu = state.feishu();

    if feishu.requires_signature() {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AppError::Unauthorized(format!("Missing {name} header")))
        };
        let timestamp = header("X-Lark-Request-Timestamp")?;
        let nonce = header("X-Lark-Request-Nonce")?;
        let signature = header("X-Lark-Signature")?;

        feishu.verify_signature(timestamp, nonce, &body, signature)?;
    }

    let envelope: CallbackEnvelope = serde_json::from_str(&body)
        .map_err(|e| AppError::BadRequest(format!("Failed to parse callback: {e}")))?;

    if envelope.encrypt.is_some() {
        return Err(AppError::BadRequest(
            "Encrypted callbacks are not supported".into(),
        ));
    }

    if envelope.kind.as_deref() == Some("url_verification") {
        feishu.verify_token(envelope.token.as_deref())?;
        debug!("Feishu URL verification");
        return Ok(Json(json!({ "challenge": envelope.challenge })).into_response());
    }

    feishu.verify_token(envelope.verification_token())?;

    let event_type = envelope
        .header
        .as_ref()
        .and_then(|h| h.event_type.as_deref());
    if event_type != Some(CARD_ACTION_EVENT) {
        info!(event_type = ?event_type, "Ignoring Feishu event");
        return Ok(Json(json!({})).into_response());
    }

    let event = envelope.event.unwrap_or_default();
    if let Some(operator) = &event.operator {
        debug!(open_id = ?operator.open_id, user_id = ?operator.user_id, "Card action");
    }
    let value = event
        .action
        .and_then(|action| action.value)
        .and_then(button_value);

    let response = state.callback().handle_button_click(value).await;
    Ok(Json(response).into_response())
}

/// Decode a button value, which arrives either as an object or as a JSON
/// string.
fn button_value(value: Value) -> Option<ButtonValue> {
    let parsed = match value {
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };

    parsed
        .inspect_err(|e| warn!(error = %e, "Malformed button value"))
        .ok()
}

/// Body of `POST /jk/feishu/token`.
#[derive(Debug, Deserialize)]
pub struct UpdateTokenRequest {
    pub user_access_token: String,
    pub user_refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Replace the delegated user token pair used for group provisioning.
#[instrument(skip(state, request))]
async fn update_token(
    State(state): State<AppState>,
    Json(request): Json<UpdateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.user_access_token.is_empty() || request.user_refresh_token.is_empty() {
        return Err(AppError::BadRequest(
            "user_access_token and user_refresh_token are required".into(),
        ));
    }

    state
        .group_chat()
        .update_token(
            request.user_access_token,
            request.user_refresh_token,
            request.expires_in.unwrap_or(PUSHED_TOKEN_TTL_SECS),
        )
        .await;

    Ok(ApiResponse::success(json!({ "message": "Token cache updated" })))
}
