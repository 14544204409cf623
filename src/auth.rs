//! Prerequisite-session probe
//!
//! Reports whether an authenticated session already exists before the
//! browser is ever opened. The heuristics live behind the [`AuthProbe`]
//! trait; the default implementation combines a CLI probe command with a
//! persisted-browser-session marker into a weighted confidence score.

use crate::errors::{OrchestrateError, OrchestrateResult};
use crate::types::AuthStatus;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Reports whether a prerequisite session already exists
#[async_trait]
pub trait AuthProbe: Send + Sync {
    async fn check(&self) -> OrchestrateResult<AuthStatus>;
}

const CLI_WEIGHT: f64 = 0.7;
const BROWSER_WEIGHT: f64 = 0.3;

/// Default probe: a CLI command plus an optional browser-session marker file
pub struct CommandProbe {
    command: Vec<String>,
    browser_marker: Option<PathBuf>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            browser_marker: None,
            timeout: Duration::from_secs(8),
        }
    }

    /// A file whose presence indicates a persisted browser session
    pub fn with_browser_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.browser_marker = Some(marker.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn cli_session_exists(&self) -> OrchestrateResult<bool> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(OrchestrateError::Validation("probe command is empty".into()));
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(err) => {
                // missing probe binary is a negative signal, not a failure
                debug!(program, %err, "probe command unavailable");
                return Ok(false);
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => Ok(status?.success()),
            Err(_) => {
                let _ = child.kill().await;
                Err(OrchestrateError::timeout(
                    "auth probe",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn browser_session_exists(&self) -> bool {
        self.browser_marker
            .as_ref()
            .map(|path| path.exists())
            .unwrap_or(false)
    }
}

#[async_trait]
impl AuthProbe for CommandProbe {
    async fn check(&self) -> OrchestrateResult<AuthStatus> {
        let cli = self.cli_session_exists().await?;
        let browser = self.browser_session_exists();

        let confidence = (if cli { CLI_WEIGHT } else { 0.0 })
            + (if browser { BROWSER_WEIGHT } else { 0.0 });
        let method = match (cli, browser) {
            (true, true) => "cli+browser",
            (true, false) => "cli",
            (false, true) => "browser",
            (false, false) => "none",
        };

        let status = AuthStatus {
            authenticated: cli || browser,
            detected_method: method.to_string(),
            confidence_score: confidence,
        };
        info!(
            authenticated = status.authenticated,
            method = %status.detected_method,
            confidence = status.confidence_score,
            "auth probe complete"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn succeeding_probe_command_reports_cli_session() {
        let probe = CommandProbe::new(vec!["true".into()]);
        let status = probe.check().await.unwrap();
        assert!(status.authenticated);
        assert_eq!(status.detected_method, "cli");
        assert!((status.confidence_score - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failing_probe_without_marker_reports_none() {
        let probe = CommandProbe::new(vec!["false".into()]);
        let status = probe.check().await.unwrap();
        assert!(!status.authenticated);
        assert_eq!(status.detected_method, "none");
        assert_eq!(status.confidence_score, 0.0);
    }

    #[tokio::test]
    async fn browser_marker_alone_is_a_weak_positive() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("session.json");
        tokio::fs::write(&marker, "{}").await.unwrap();

        let probe = CommandProbe::new(vec!["false".into()]).with_browser_marker(&marker);
        let status = probe.check().await.unwrap();
        assert!(status.authenticated);
        assert_eq!(status.detected_method, "browser");
        assert!((status.confidence_score - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_probe_binary_is_a_negative_signal() {
        let probe = CommandProbe::new(vec!["credmint-no-such-binary".into()]);
        let status = probe.check().await.unwrap();
        assert!(!status.authenticated);
    }
}
