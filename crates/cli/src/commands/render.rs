//! Offline card rendering for debugging request files.

use std::path::Path;

use chatops_core::{CardState, ReleaseRequest, RequestId};
use chatops_server::card::render_state;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request does not render: services[0] needs object_id, actions and branches")]
    InvalidCard,
}

/// Render the card a fresh request would produce, as pretty JSON.
///
/// The file holds a release request, either bare or as the `card_data` of a
/// send-card body.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the request
/// does not render.
pub fn render_file(path: &Path, request_id: Option<String>) -> Result<String, RenderError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
        path: path.display().to_string(),
        source,
    })?;
    render(&raw, request_id)
}

fn render(raw: &str, request_id: Option<String>) -> Result<String, RenderError> {
    let mut value: Value = serde_json::from_str(raw)?;
    if let Some(card_data) = value.get_mut("card_data") {
        value = card_data.take();
    }
    let request: ReleaseRequest = serde_json::from_value(value)?;

    let request_id = request_id.map_or_else(RequestId::generate, RequestId::new);
    let card = render_state(&CardState::new(request), &request_id).ok_or(RenderError::InvalidCard)?;

    Ok(serde_json::to_string_pretty(&card)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"{
        "title": "发布申请",
        "services": [
            {"name": "api", "object_id": "proj", "branches": ["main"], "actions": ["gray", "official"]}
        ]
    }"#;

    #[test]
    fn test_render_uses_given_request_id() {
        let out = render(REQUEST, Some("req_fixed".to_string())).unwrap();
        let card: Value = serde_json::from_str(&out).unwrap();
        assert!(out.contains("req_fixed"));
        assert_eq!(card["header"]["template"], "blue");
    }

    #[test]
    fn test_render_accepts_send_card_body() {
        let body = format!(r#"{{"receive_id": "x", "receive_id_type": "chat_id", "card_data": {REQUEST}}}"#);
        assert!(render(&body, None).is_ok());
    }

    #[test]
    fn test_render_rejects_unrenderable_request() {
        let err = render(r#"{"title": "t", "services": []}"#, None).unwrap_err();
        assert!(matches!(err, RenderError::InvalidCard));
    }

    #[test]
    fn test_render_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_file(&dir.path().join("nope.json"), None).unwrap_err();
        assert!(matches!(err, RenderError::Read { .. }));
    }
}
