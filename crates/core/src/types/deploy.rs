//! Deploy type passed to the CI pipeline.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Value of the `DEPLOY_TYPE` build parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployType {
    /// Partial (canary) rollout.
    Gray,
    /// Full production rollout.
    Deploy,
    /// Revert to the previous release.
    Rollback,
    /// Restart the running release.
    Restart,
}

/// Error returned when parsing an unknown deploy type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown deploy type: {0}")]
pub struct UnknownDeployType(pub String);

impl DeployType {
    /// The parameter value the pipeline expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "Gray",
            Self::Deploy => "Deploy",
            Self::Rollback => "Rollback",
            Self::Restart => "Restart",
        }
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployType {
    type Err = UnknownDeployType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gray" => Ok(Self::Gray),
            "Deploy" => Ok(Self::Deploy),
            "Rollback" => Ok(Self::Rollback),
            "Restart" => Ok(Self::Restart),
            other => Err(UnknownDeployType(other.to_string())),
        }
    }
}
