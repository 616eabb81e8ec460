//! OA ingestion errors.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::feishu::FeishuError;

/// Errors that can occur when reading OA approvals.
#[derive(Debug, Error)]
pub enum OaError {
    /// No `original_data` object with an `fwm` field was found.
    #[error("Failed to extract original_data from OA document")]
    MissingOriginalData,

    /// `fwm` is missing or not a string.
    #[error("Failed to extract job list (fwm) from original_data")]
    MissingJobList,

    /// Stored document could not be read or updated.
    #[error("OA storage error: {0}")]
    Repository(#[from] RepositoryError),

    /// Initiator lookup failed.
    #[error("OA initiator lookup failed: {0}")]
    Lookup(#[from] FeishuError),
}
