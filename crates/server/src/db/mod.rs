//! Database operations for chatops `PostgreSQL`.
//!
//! ## Tables (schema `chatops`)
//!
//! - `card_states` - Persisted card state per request id (JSONB)
//! - `oa_requests` - Raw OA approval payloads and their processed flag
//! - `feishu_tokens` - Delegated Feishu user access/refresh token pair
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p chatops-cli -- migrate
//! ```
//!
//! Queries are built at runtime (`sqlx::query_as`) so the crate compiles
//! without a live database or an offline query cache.

pub mod card_states;
pub mod feishu_tokens;
pub mod oa_requests;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use card_states::CardStateRepository;
pub use feishu_tokens::{FeishuTokenRepository, StoredUserToken};
pub use oa_requests::{OaRequestRecord, OaRequestRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate id).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique-violation into `Conflict`, everything else into `Database`.
fn map_insert_error(e: sqlx::Error, what: &str) -> RepositoryError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            RepositoryError::Conflict(format!("{what} already exists"))
        }
        other => RepositoryError::Database(other),
    }
}
