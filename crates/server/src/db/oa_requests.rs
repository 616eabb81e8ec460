//! OA request repository.
//!
//! Raw approval payloads posted by the OA system, plus the `processed` flag
//! the polling scheduler flips once a card has been sent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::types::Json;

use super::{RepositoryError, map_insert_error};

/// A stored OA request.
#[derive(Debug, Clone, Serialize)]
pub struct OaRequestRecord {
    pub id: String,
    pub data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Internal row type for OA request queries.
#[derive(Debug, sqlx::FromRow)]
struct OaRequestRow {
    id: String,
    data: Json<serde_json::Value>,
    processed: bool,
    created_at: DateTime<Utc>,
}

impl From<OaRequestRow> for OaRequestRecord {
    fn from(row: OaRequestRow) -> Self {
        Self {
            id: row.id,
            data: row.data.0,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

/// Repository for OA requests.
pub struct OaRequestRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OaRequestRepository<'a> {
    /// Create a new OA request repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Store a new payload.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the id is already taken.
    /// Returns `RepositoryError::Database` for other database failures.
    pub async fn insert(&self, id: &str, data: &serde_json::Value) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO chatops.oa_requests (id, data)
            VALUES ($1, $2)
            ",
        )
        .bind(id)
        .bind(Json(data))
        .execute(self.pool)
        .await
        .map_err(|e| map_insert_error(e, "oa request"))?;

        Ok(())
    }

    /// Get a payload by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: &str) -> Result<Option<OaRequestRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, OaRequestRow>(
            r"
            SELECT id, data, processed, created_at
            FROM chatops.oa_requests
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// All payloads, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<OaRequestRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, OaRequestRow>(
            r"
            SELECT id, data, processed, created_at
            FROM chatops.oa_requests
            ORDER BY created_at DESC
            ",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// The most recently stored payload.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn latest(&self) -> Result<Option<OaRequestRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, OaRequestRow>(
            r"
            SELECT id, data, processed, created_at
            FROM chatops.oa_requests
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Unprocessed payloads, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_unprocessed(&self) -> Result<Vec<OaRequestRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, OaRequestRow>(
            r"
            SELECT id, data, processed, created_at
            FROM chatops.oa_requests
            WHERE processed = FALSE
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Flag a payload as handled.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no row has this id.
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn mark_processed(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE chatops.oa_requests
            SET processed = TRUE, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
