//! Unified error handling and the JSON response envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::feishu::FeishuError;
use crate::oa::OaError;
use crate::services::CardError;
use crate::store::StoreError;

/// Envelope `code` for success.
pub const CODE_OK: i32 = 0;
/// Envelope `code` for client errors.
pub const CODE_CLIENT_ERROR: i32 = 40000;
/// Envelope `code` for server errors.
pub const CODE_SERVER_ERROR: i32 = 50000;

/// JSON body returned by every API endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            code: CODE_OK,
            message: "success".to_string(),
            data: Some(data),
        })
    }
}

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Card state could not be persisted.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Feishu or Jenkins call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Callback signature or token check failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CardError> for AppError {
    fn from(err: CardError) -> Self {
        match err {
            CardError::MissingReceiver | CardError::InvalidCard => Self::BadRequest(err.to_string()),
            CardError::Store(e) => Self::Store(e),
            CardError::Serialization(e) => Self::Internal(e.to_string()),
            CardError::Send(e) => Self::Upstream(e.to_string()),
        }
    }
}

impl From<FeishuError> for AppError {
    fn from(err: FeishuError) -> Self {
        match err {
            FeishuError::InvalidSignature(_) => Self::Unauthorized(err.to_string()),
            FeishuError::InvalidPayload(_) => Self::BadRequest(err.to_string()),
            _ => Self::Upstream(err.to_string()),
        }
    }
}

impl From<OaError> for AppError {
    fn from(err: OaError) -> Self {
        match err {
            OaError::Repository(RepositoryError::NotFound) => {
                Self::NotFound("OA record".to_string())
            }
            OaError::Repository(e) => Self::Database(e),
            OaError::Lookup(e) => e.into(),
            OaError::MissingOriginalData | OaError::MissingJobList => {
                Self::BadRequest(err.to_string())
            }
        }
    }
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose storage details to clients
        let message = match &self {
            Self::Database(_) | Self::Store(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let code = if status.is_server_error() {
            CODE_SERVER_ERROR
        } else {
            CODE_CLIENT_ERROR
        };

        let body = ApiResponse::<()> {
            code,
            message,
            data: None,
        };

        (status, Json(body)).into_response()
    }
}
