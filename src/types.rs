//! Core data model for orchestration runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// State machine states for the orchestration workflow
///
/// The happy path visits the states in declaration order. `Error` is
/// reachable from any non-terminal state after `Init`; `Cleanup` always
/// precedes the terminal `Complete`/`Error` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    Init,
    CheckAuth,
    SessionInit,
    BrowserOpen,
    Navigate,
    FillForm,
    WizardNav,
    ExtractToken,
    ValidateToken,
    SaveToken,
    TestToken,
    Cleanup,
    Complete,
    Error,
}

impl OrchestrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CheckAuth => "check_auth",
            Self::SessionInit => "session_init",
            Self::BrowserOpen => "browser_open",
            Self::Navigate => "navigate",
            Self::FillForm => "fill_form",
            Self::WizardNav => "wizard_nav",
            Self::ExtractToken => "extract_token",
            Self::ValidateToken => "validate_token",
            Self::SaveToken => "save_token",
            Self::TestToken => "test_token",
            Self::Cleanup => "cleanup",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the prerequisite-session probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether an existing session was detected
    pub authenticated: bool,

    /// Which mechanism detected it (e.g. "cli", "browser", "cli+browser")
    pub detected_method: String,

    /// Detection confidence, normalized to 0.0..=1.0
    pub confidence_score: f64,
}

impl AuthStatus {
    pub fn absent() -> Self {
        Self {
            authenticated: false,
            detected_method: "none".to_string(),
            confidence_score: 0.0,
        }
    }
}

/// Extracted credential that never leaks its raw value through logging
/// or serialization
///
/// `Display`, `Debug` and `Serialize` all emit the redacted form (first
/// eight and last eight characters); the raw secret is only reachable via
/// [`SecretToken::reveal`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Access the raw secret; callers own the exposure
    pub fn reveal(&self) -> &str {
        &self.0
    }

    /// Redacted display form: first 8 + last 8 characters
    pub fn redacted(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() < 20 {
            return "****...****".to_string();
        }
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{head}...{tail}")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretToken({})", self.redacted())
    }
}

impl Serialize for SecretToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}

/// Diagnostic report returned by driver primitives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Success flag
    pub success: bool,

    /// Diagnostic text (failure reason or progress note)
    pub message: String,

    /// Wizard steps taken, pages visited, etc.
    pub detail: Option<serde_json::Value>,
}

impl StepReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            detail: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Immutable snapshot of a finished orchestration run
///
/// The sole artifact that survives an `orchestrate()` call. Serializes to a
/// flat structure; the token field is always the redacted display form.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    /// Run identifier
    pub run_id: Uuid,

    /// Overall success
    pub success: bool,

    /// Account the wizard was asked to create
    pub account_name: String,

    /// Extracted credential, redacted on serialization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretToken>,

    /// Error message if the run failed
    pub error_message: Option<String>,

    /// Run start time
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds
    pub duration_ms: u64,

    /// Final state machine state
    pub final_state: OrchestrationState,

    /// Append-only list of states visited, beginning with `init`
    pub state_transitions: Vec<OrchestrationState>,

    /// Prerequisite-session probe summary, if the probe ran
    pub auth_status: Option<AuthStatus>,

    /// Token passed grammar validation
    pub validated: bool,

    /// Token was persisted to the profile file
    pub saved: bool,

    /// Token passed the external verification command
    pub tested: bool,
}

impl OrchestrationResult {
    pub fn summary(&self) -> String {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        format!(
            "[{}] account={} duration={:.1}s state={} token={} saved={} tested={}",
            status,
            self.account_name,
            self.duration_ms as f64 / 1000.0,
            self.final_state,
            if self.token.is_some() { "yes" } else { "no" },
            if self.saved { "yes" } else { "no" },
            if self.tested { "yes" } else { "no" },
        )
    }
}
