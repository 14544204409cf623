//! credmint library
//!
//! Autonomous browser-wizard orchestration: a state machine that drives a
//! multi-step web wizard to completion, extracts the terminal credential and
//! persists it, with classified retries and guaranteed cleanup.

pub mod auth;
pub mod browser;
pub mod config;
pub mod decision;
pub mod errors;
pub mod extract;
pub mod orchestrator;
pub mod persist;
pub mod retry;
pub mod session;
pub mod types;
pub mod ui;
pub mod verify;

// Re-export commonly used types for external use
pub use config::OrchestratorConfig;
pub use decision::{Action, ActionKind, DecisionEngine, Intent, PageState};
pub use errors::{OrchestrateError, OrchestrateResult};
pub use orchestrator::{Collaborators, Orchestrator};
pub use retry::RetryStrategy;
pub use types::{AuthStatus, OrchestrationResult, OrchestrationState, SecretToken};
