//! Core types for chatops.
//!
//! This module provides the release-card domain model shared by the server,
//! the CLI and the integration tests.

pub mod action;
pub mod deploy;
pub mod id;
pub mod request;

pub use action::{ActionKind, BATCH_SERVICE, ButtonAction, composite_key};
pub use deploy::{DeployType, UnknownDeployType};
pub use id::RequestId;
pub use request::{CardState, ReleaseRequest, ServiceSpec};
