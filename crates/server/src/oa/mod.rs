//! OA approval ingestion.
//!
//! Approved release requests are pushed by the OA system as JSON documents,
//! stored in `oa_requests` and picked up by the polling scheduler.

mod error;
mod ingest;
mod parser;
mod source;

pub use error::OaError;
pub use ingest::{StoredOaDocument, normalize_body};
pub use parser::{OaRelease, ReleaseJob, parse_release};
pub use source::OaSource;
