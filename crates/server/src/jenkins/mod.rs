//! Jenkins integration.

mod client;
mod error;
mod types;

pub use client::JenkinsClient;
pub use error::JenkinsError;
pub use types::{BuildInfo, BuildOutcome, PollTiming, QueueItem};
