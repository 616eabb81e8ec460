//! Feishu-related errors.

use thiserror::Error;

/// Errors that can occur when interacting with Feishu.
#[derive(Debug, Error)]
pub enum FeishuError {
    /// HTTP request failed.
    #[error("Feishu request failed: {0}")]
    Request(String),

    /// Failed to parse response.
    #[error("Feishu response error: {0}")]
    Response(String),

    /// Feishu API returned a non-zero code.
    #[error("Feishu API error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// Tenant or user token could not be obtained.
    #[error("Feishu token error: {0}")]
    Token(String),

    /// Invalid callback signature or verification token.
    #[error("Invalid Feishu signature: {0}")]
    InvalidSignature(String),

    /// Payload could not be parsed or built.
    #[error("Invalid Feishu payload: {0}")]
    InvalidPayload(String),

    /// Directory lookup found no user with this name.
    #[error("Feishu user not found: {0}")]
    UserNotFound(String),

    /// Configuration error.
    #[error("Feishu configuration error: {0}")]
    Config(String),
}
