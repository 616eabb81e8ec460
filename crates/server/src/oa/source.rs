//! OA approvals as the scheduler's upstream source.

use async_trait::async_trait;
use sqlx::PgPool;

use super::error::OaError;
use crate::db::OaRequestRepository;
use crate::feishu::FeishuClient;
use crate::services::scheduler::{UpstreamRequest, UpstreamSource};

/// Reads unprocessed approvals from `oa_requests` and resolves initiators
/// through the Feishu directory.
#[derive(Debug, Clone)]
pub struct OaSource {
    pool: PgPool,
    feishu: FeishuClient,
}

impl OaSource {
    #[must_use]
    pub const fn new(pool: PgPool, feishu: FeishuClient) -> Self {
        Self { pool, feishu }
    }
}

#[async_trait]
impl UpstreamSource for OaSource {
    async fn fetch_unprocessed(&self) -> Result<Vec<UpstreamRequest>, OaError> {
        let records = OaRequestRepository::new(&self.pool)
            .list_unprocessed()
            .await?;

        Ok(records
            .into_iter()
            .map(|record| UpstreamRequest {
                id: record.id,
                document: record.data,
            })
            .collect())
    }

    async fn mark_processed(&self, id: &str) -> Result<(), OaError> {
        OaRequestRepository::new(&self.pool)
            .mark_processed(id)
            .await?;
        Ok(())
    }

    async fn resolve_user_id(&self, name: &str) -> Result<String, OaError> {
        Ok(self.feishu.find_user_id_by_name(name).await?)
    }
}
