//! Card distribution and raw message passthrough.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use chatops_core::ReleaseRequest;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{ApiResponse, AppError};
use crate::feishu::{MessageType, text_content};
use crate::state::AppState;

/// Create card routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/send-card", post(send_card))
        .route("/api/send", post(send_message))
}

/// Body of `POST /api/send-card`.
#[derive(Debug, Deserialize)]
pub struct SendCardRequest {
    #[serde(default)]
    pub receive_id: String,
    #[serde(default)]
    pub receive_id_type: String,
    pub card_data: ReleaseRequest,
}

/// Store, render and send a release card.
#[instrument(skip(state, request), fields(receive_id_type = %request.receive_id_type))]
async fn send_card(
    State(state): State<AppState>,
    Json(request): Json<SendCardRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut card = request.card_data;
    card.receive_id = request.receive_id;
    card.receive_id_type = request.receive_id_type;

    let request_id = state.cards().send_card(card).await?;

    Ok(ApiResponse::success(json!({
        "request_id": request_id,
        "message": "Release card sent successfully",
    })))
}

/// Body of `POST /api/send`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub receive_id: String,
    #[serde(default)]
    pub receive_id_type: String,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub content: Option<Value>,
}

/// Send a text message or a caller-built card as is.
#[instrument(skip(state, request), fields(msg_type = %request.msg_type))]
async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.receive_id.is_empty() {
        return Err(AppError::BadRequest("receive_id is required".into()));
    }
    if request.receive_id_type.is_empty() {
        return Err(AppError::BadRequest("receive_id_type is required".into()));
    }
    let content = request
        .content
        .ok_or_else(|| AppError::BadRequest("content is required".into()))?;

    let (msg_type, content, message) = match request.msg_type.as_str() {
        "text" => (
            MessageType::Text,
            text_message(&content)?,
            "Text message sent successfully",
        ),
        "interactive" => (
            MessageType::Interactive,
            interactive_message(content)?,
            "Card message sent successfully",
        ),
        "" => return Err(AppError::BadRequest("msg_type is required".into())),
        other => {
            return Err(AppError::BadRequest(format!(
                "Unsupported message type: {other}"
            )));
        }
    };

    state
        .cards()
        .send_raw(&request.receive_id, &request.receive_id_type, msg_type, &content)
        .await?;

    Ok(ApiResponse::success(json!({ "message": message })))
}

/// Accepts `{"text": "..."}` or a bare string.
fn text_message(content: &Value) -> Result<String, AppError> {
    let text = match content {
        Value::Object(obj) => obj.get("text").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };

    match text {
        Some(text) if !text.trim().is_empty() => Ok(text_content(text)),
        _ => Err(AppError::BadRequest("invalid text content format".into())),
    }
}

/// Accepts a card object, optionally wrapped in `{"card": ...}`.
///
/// Schema 2.0 cards (`schema` or `body` present) must carry
/// `body.elements`; top-level `elements` are moved there. Other cards must
/// carry `elements` or `modules`.
fn interactive_message(content: Value) -> Result<String, AppError> {
    let invalid = || AppError::BadRequest("invalid card content format".into());

    let Value::Object(mut raw) = content else {
        return Err(invalid());
    };
    let mut card = match raw.remove("card") {
        Some(Value::Object(card)) => card,
        Some(_) => return Err(invalid()),
        None => raw,
    };

    let is_v2 = card.contains_key("schema") || card.contains_key("body");
    if is_v2 {
        card.entry("schema").or_insert_with(|| json!("2.0"));
        if !card.get("body").is_some_and(Value::is_object)
            && let Some(elements) = card.remove("elements")
        {
            card.insert("body".to_string(), json!({ "elements": elements }));
        }
        if element_count(card.get("body").and_then(|b| b.get("elements"))) == 0 {
            return Err(AppError::BadRequest(
                "card V2 must include body.elements".into(),
            ));
        }
    } else if element_count(card.get("elements")) == 0 && element_count(card.get("modules")) == 0
    {
        return Err(AppError::BadRequest(
            "card must include elements or modules".into(),
        ));
    }

    serde_json::to_string(&Value::Object(card)).map_err(|e| AppError::Internal(e.to_string()))
}

fn element_count(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map_or(0, Vec::len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_shapes() {
        assert_eq!(
            text_message(&json!({"text": "hello"})).unwrap(),
            r#"{"text":"hello"}"#
        );
        assert_eq!(text_message(&json!("hi")).unwrap(), r#"{"text":"hi"}"#);
        assert!(text_message(&json!({"text": "  "})).is_err());
        assert!(text_message(&json!(3)).is_err());
    }

    #[test]
    fn test_interactive_v1_requires_elements() {
        let ok = interactive_message(json!({"elements": [{"tag": "hr"}]})).unwrap();
        assert!(ok.contains("\"elements\""));

        let wrapped = interactive_message(json!({"card": {"modules": [{"tag": "hr"}]}})).unwrap();
        assert!(wrapped.contains("\"modules\""));

        assert!(interactive_message(json!({"header": {}})).is_err());
        assert!(interactive_message(json!("not a card")).is_err());
    }

    #[test]
    fn test_interactive_v2_moves_elements_into_body() {
        let out = interactive_message(json!({
            "schema": "2.0",
            "elements": [{"tag": "markdown", "content": "x"}]
        }))
        .unwrap();
        let card: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(card["schema"], "2.0");
        assert_eq!(card["body"]["elements"][0]["tag"], "markdown");
        assert!(card.get("elements").is_none());

        let out = interactive_message(json!({"body": {"elements": [{"tag": "hr"}]}})).unwrap();
        let card: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(card["schema"], "2.0");

        assert!(interactive_message(json!({"schema": "2.0", "body": {}})).is_err());
    }
}
