//! Jenkins JSON API types.

use std::time::Duration;

use serde::Deserialize;

/// `GET /queue/item/{id}/api/json`
#[derive(Debug, Clone, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub executable: Option<Executable>,
    /// Why the item is still waiting, if it is.
    #[serde(default)]
    pub why: Option<String>,
}

/// The build a queue item turned into.
#[derive(Debug, Clone, Deserialize)]
pub struct Executable {
    pub number: u64,
}

/// `GET /job/{job}/{number}/api/json`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub building: bool,
    /// `SUCCESS`, `FAILURE`, `UNSTABLE`, `ABORTED`; null while running.
    #[serde(default)]
    pub result: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
}

/// Terminal state of a monitored build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub result: String,
    pub duration: Duration,
}

impl BuildOutcome {
    /// Jenkins' success result.
    pub const SUCCESS: &'static str = "SUCCESS";

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result == Self::SUCCESS
    }
}

/// Polling and retry timings.
#[derive(Debug, Clone)]
pub struct PollTiming {
    /// Delay between queue item polls while waiting for a build to start.
    pub queue_poll: Duration,
    /// Delay between build status polls.
    pub build_poll: Duration,
    /// Delays between trigger attempts; one attempt more than entries.
    pub trigger_backoff: Vec<Duration>,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            queue_poll: Duration::from_secs(1),
            build_poll: Duration::from_secs(5),
            trigger_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }
}
