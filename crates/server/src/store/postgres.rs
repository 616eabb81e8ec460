//! `PostgreSQL` card state backend.

use async_trait::async_trait;
use chatops_core::{CardState, RequestId};
use sqlx::PgPool;

use super::{CardStateBackend, StoreError};
use crate::db::CardStateRepository;

/// Card state stored in `chatops.card_states`.
#[derive(Debug, Clone)]
pub struct PgCardStateBackend {
    pool: PgPool,
}

impl PgCardStateBackend {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardStateBackend for PgCardStateBackend {
    async fn load(&self, id: &RequestId) -> Result<Option<CardState>, StoreError> {
        Ok(CardStateRepository::new(&self.pool).get(id).await?)
    }

    async fn save(&self, id: &RequestId, state: &CardState) -> Result<(), StoreError> {
        Ok(CardStateRepository::new(&self.pool).upsert(id, state).await?)
    }

    async fn delete(&self, id: &RequestId) -> Result<(), StoreError> {
        Ok(CardStateRepository::new(&self.pool).delete(id).await?)
    }
}
