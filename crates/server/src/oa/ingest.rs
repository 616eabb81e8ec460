//! Normalization of inbound OA webhook bodies.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Document stored for every accepted OA webhook call.
#[derive(Debug, Clone, Serialize)]
pub struct StoredOaDocument {
    /// Short random id (the record key adds a timestamp prefix).
    pub id: String,
    /// RFC 3339 receive time.
    pub received_at: String,
    pub ip_address: String,
    pub user_agent: String,
    pub original_data: Value,
}

impl StoredOaDocument {
    /// Wrap a parsed body and return `(record_id, document)`.
    ///
    /// The record id has the form `YYYYmmdd_HHMMSS_{8 hex}`.
    #[must_use]
    pub fn new(
        body: Value,
        ip_address: String,
        user_agent: String,
        now: DateTime<Local>,
    ) -> (String, Self) {
        let short_id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let record_id = format!("{}_{short_id}", now.format("%Y%m%d_%H%M%S"));

        let document = Self {
            id: short_id,
            received_at: now.to_rfc3339(),
            ip_address,
            user_agent,
            original_data: normalize_body(body),
        };

        (record_id, document)
    }
}

/// Coerce a webhook body into an object.
///
/// Objects pass through. A JSON string holding an object is decoded; one that
/// does not decode to an object is kept raw next to the parse error. Any other
/// value is wrapped with its type name.
#[must_use]
pub fn normalize_body(body: Value) -> Value {
    match body {
        Value::Object(_) => body,
        Value::String(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(object) => Value::Object(object),
            Err(e) => json!({
                "_raw_json_string": raw,
                "_parse_error": e.to_string(),
            }),
        },
        other => {
            let data_type = match &other {
                Value::Null => "null",
                Value::Bool(_) => "bool",
                Value::Number(_) => "number",
                Value::Array(_) => "array",
                Value::String(_) | Value::Object(_) => "unknown",
            };
            json!({
                "_parsed_data": other,
                "_data_type": data_type,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_normalize_body() {
        assert_eq!(normalize_body(json!({"fwm": "a b"})), json!({"fwm": "a b"}));
        assert_eq!(
            normalize_body(json!("{\"fwm\":\"a b\"}")),
            json!({"fwm": "a b"})
        );

        let raw = normalize_body(json!("not json"));
        assert_eq!(raw["_raw_json_string"], "not json");
        assert!(raw["_parse_error"].is_string());

        assert_eq!(
            normalize_body(json!([1, 2])),
            json!({"_parsed_data": [1, 2], "_data_type": "array"})
        );
    }

    #[test]
    fn test_stored_document_ids() {
        let now = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let (record_id, document) = StoredOaDocument::new(
            json!({"fwm": "a b"}),
            "10.0.0.1".to_string(),
            "OA/1.0".to_string(),
            now,
        );

        assert!(record_id.starts_with("20250304_050607_"));
        assert_eq!(record_id.len(), "20250304_050607_".len() + 8);
        assert!(record_id.ends_with(&document.id));
        assert_eq!(document.original_data, json!({"fwm": "a b"}));

        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["ip_address"], "10.0.0.1");
        assert_eq!(value["user_agent"], "OA/1.0");
    }
}
