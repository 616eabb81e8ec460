//! OA webhook ingestion, stored record lookup and the manual test flow.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::db::OaRequestRepository;
use crate::error::{ApiResponse, AppError};
use crate::oa::StoredOaDocument;
use crate::services::{Progress, UpstreamRequest};
use crate::state::AppState;

/// Create OA routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/store-json", post(store_json))
        .route("/api/get-json/{id}", get(get_json))
        .route("/api/get-json-all", get(get_json_all))
        .route("/api/get-latest-json", get(get_latest_json))
        .route("/api/oa/test-flow", post(test_flow))
}

/// Accept an OA webhook body and store it for the scheduler.
#[instrument(skip(state, headers, body), fields(len = body.len()))]
async fn store_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return Err(AppError::BadRequest(
            "Content-Type must be application/json".into(),
        ));
    }

    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))?;

    let (record_id, document) = StoredOaDocument::new(
        parsed,
        client_ip(&headers),
        header_str(&headers, header::USER_AGENT.as_str()).to_string(),
        Local::now(),
    );
    let data = serde_json::to_value(&document).map_err(|e| AppError::Internal(e.to_string()))?;

    OaRequestRepository::new(state.pool())
        .insert(&record_id, &data)
        .await?;

    info!(id = %record_id, "OA request stored");
    Ok(ApiResponse::success(json!({ "id": record_id })))
}

/// Fetch one stored OA record.
#[instrument(skip(state))]
async fn get_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = OaRequestRepository::new(state.pool())
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("OA record {id}")))?;

    Ok(ApiResponse::success(record))
}

/// Fetch every stored OA record.
#[instrument(skip(state))]
async fn get_json_all(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let records = OaRequestRepository::new(state.pool()).list_all().await?;
    if records.is_empty() {
        return Err(AppError::NotFound("No valid data found".into()));
    }

    Ok(ApiResponse::success(records))
}

/// Fetch the most recently stored OA record.
#[instrument(skip(state))]
async fn get_latest_json(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let latest = OaRequestRepository::new(state.pool())
        .latest()
        .await?
        .ok_or_else(|| AppError::NotFound("No valid data found".into()))?;

    Ok(ApiResponse::success(json!({ "latest_file": latest })))
}

/// Body of `POST /api/oa/test-flow`.
#[derive(Debug, Deserialize)]
pub struct TestFlowRequest {
    #[serde(default)]
    pub receive_id: String,
    #[serde(default)]
    pub receive_id_type: String,
}

/// Run the newest OA record through card generation in the background,
/// reporting each step to the given receiver. The record's processed flag
/// is left untouched.
#[instrument(skip(state, request))]
async fn test_flow(
    State(state): State<AppState>,
    Json(request): Json<TestFlowRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.receive_id.is_empty() {
        return Err(AppError::BadRequest("receive_id is required".into()));
    }
    let receive_id_type = if request.receive_id_type.is_empty() {
        "open_id".to_string()
    } else {
        request.receive_id_type
    };

    let progress = Progress::new(
        state.sender().clone(),
        request.receive_id,
        receive_id_type,
    );

    tokio::spawn(async move {
        let latest = match OaRequestRepository::new(state.pool()).latest().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                progress.report("❌ 获取 OA 数据失败: no OA records stored").await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load latest OA record");
                progress.report(&format!("❌ 获取 OA 数据失败: {e}")).await;
                return;
            }
        };

        let request = UpstreamRequest {
            id: latest.id,
            document: latest.data,
        };
        let outcome = state
            .scheduler()
            .process_request(&request, Some(&progress))
            .await;
        info!(id = %request.id, outcome = ?outcome, "Test flow finished");
    });

    Ok(ApiResponse::success(json!({ "message": "Test flow started" })))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, "x-forwarded-for")
        .split(',')
        .next()
        .map(str::trim)
        .unwrap_or_default();

    if forwarded.is_empty() {
        header_str(headers, "x-real-ip").to_string()
    } else {
        forwarded.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");

        assert_eq!(client_ip(&HeaderMap::new()), "");
    }
}
