//! Delegated Feishu user token storage.
//!
//! A single row (`id = 'user'`) holds the current access/refresh pair so a
//! restart does not lose a refresh token that Feishu has already rotated.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use super::RepositoryError;

const USER_TOKEN_ID: &str = "user";

/// A persisted user token pair.
#[derive(Clone)]
pub struct StoredUserToken {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredUserToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredUserToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Internal row type for token queries.
#[derive(sqlx::FromRow)]
struct FeishuTokenRow {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl From<FeishuTokenRow> for StoredUserToken {
    fn from(row: FeishuTokenRow) -> Self {
        Self {
            access_token: SecretString::from(row.access_token),
            refresh_token: SecretString::from(row.refresh_token),
            expires_at: row.expires_at,
        }
    }
}

/// Repository for the delegated user token.
pub struct FeishuTokenRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> FeishuTokenRepository<'a> {
    /// Create a new token repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load the stored user token, if any.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn load(&self) -> Result<Option<StoredUserToken>, RepositoryError> {
        let row = sqlx::query_as::<_, FeishuTokenRow>(
            r"
            SELECT access_token, refresh_token, expires_at
            FROM chatops.feishu_tokens
            WHERE id = $1
            ",
        )
        .bind(USER_TOKEN_ID)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Replace the stored user token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn save(&self, token: &StoredUserToken) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO chatops.feishu_tokens (id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            ",
        )
        .bind(USER_TOKEN_ID)
        .bind(token.access_token.expose_secret())
        .bind(token.refresh_token.expose_secret())
        .bind(token.expires_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
