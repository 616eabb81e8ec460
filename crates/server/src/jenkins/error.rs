//! Jenkins-related errors.

use thiserror::Error;

/// Errors that can occur when driving Jenkins builds.
#[derive(Debug, Error)]
pub enum JenkinsError {
    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request failed.
    #[error("Jenkins request failed: {0}")]
    Request(String),

    /// Failed to parse response.
    #[error("Jenkins response error: {0}")]
    Response(String),

    /// Jenkins refused to queue the build.
    #[error("Jenkins rejected build trigger: {0}")]
    Trigger(String),

    /// The trigger response did not point at a queue item.
    #[error("Failed to parse queue id from location '{0}'")]
    MissingQueueId(String),

    /// The queue item was cancelled before it started.
    #[error("Queue item {0} was cancelled")]
    Cancelled(u64),

    /// The build did not leave the queue in time.
    #[error("Timeout waiting for build to start (queue id: {0})")]
    StartTimeout(u64),

    /// Build status polling kept failing.
    #[error("Build monitoring failed: {0}")]
    Monitor(String),

    /// Configuration error.
    #[error("Jenkins configuration error: {0}")]
    Config(String),
}
