//! Release workflow services.
//!
//! # Services
//!
//! - `cards` - Create, store and deliver release cards
//! - `callback` - Button click state machine
//! - `orchestrator` - Jenkins build lifecycle and chat notifications
//! - `scheduler` - OA polling and credential refresh

pub mod callback;
pub mod cards;
pub mod orchestrator;
pub mod scheduler;

pub use callback::CallbackService;
pub use cards::{CardError, CardService};
pub use orchestrator::{Builder, ReleaseLauncher, ReleaseOrchestrator, RunOutcome};
pub use scheduler::{
    CredentialRefresher, GroupProvisioner, PassReport, PollingScheduler, Progress,
    RequestOutcome, SchedulerOptions, UpstreamRequest, UpstreamSource,
};
