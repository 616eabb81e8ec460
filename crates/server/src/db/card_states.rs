//! Card state repository.
//!
//! One JSONB document per request id, written with an upsert so `save`
//! overwrites any previous state for the same id.

use chatops_core::{CardState, RequestId};
use sqlx::PgPool;
use sqlx::types::Json;

use super::RepositoryError;

/// Internal row type for card state queries.
#[derive(Debug, sqlx::FromRow)]
struct CardStateRow {
    data: Json<serde_json::Value>,
}

impl TryFrom<CardStateRow> for CardState {
    type Error = RepositoryError;

    fn try_from(row: CardStateRow) -> Result<Self, Self::Error> {
        serde_json::from_value(row.data.0)
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid card state: {e}")))
    }
}

/// Repository for persisted card state.
pub struct CardStateRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CardStateRepository<'a> {
    /// Create a new card state repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load the state for a request.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the stored document is invalid.
    pub async fn get(&self, id: &RequestId) -> Result<Option<CardState>, RepositoryError> {
        let row = sqlx::query_as::<_, CardStateRow>(
            r"
            SELECT data
            FROM chatops.card_states
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Insert or replace the state for a request.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn upsert(&self, id: &RequestId, state: &CardState) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO chatops.card_states (id, data)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            ",
        )
        .bind(id)
        .bind(Json(state))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Delete the state for a request. Deleting an unknown id is not an error.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn delete(&self, id: &RequestId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM chatops.card_states WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}
