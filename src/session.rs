//! Browser session persistence
//!
//! Owns the cookies/local-storage snapshot that survives between runs.
//! Concurrent runs must point at distinct session files; the orchestrator
//! does not arbitrate that (caller responsibility).

use crate::errors::{OrchestrateError, OrchestrateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persisted browser state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: BTreeMap<String, String>,
    pub local_storage: BTreeMap<String, String>,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Create/save/restore/close lifecycle around one session file
#[derive(Debug)]
pub struct SessionManager {
    session_file: PathBuf,
    state: SessionState,
    open: bool,
}

impl SessionManager {
    /// Create a manager bound to a session file, ensuring its directory
    /// exists
    pub async fn create(session_file: impl Into<PathBuf>) -> OrchestrateResult<Self> {
        let session_file = session_file.into();
        if let Some(parent) = session_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|err| {
                    OrchestrateError::resource(
                        "session directory",
                        format!("{}: {err}", parent.display()),
                    )
                })?;
            }
        }
        debug!(path = %session_file.display(), "session manager created");
        Ok(Self {
            session_file,
            state: SessionState::default(),
            open: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.session_file
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Load persisted state from the session file, if present
    pub async fn restore(&mut self) -> OrchestrateResult<bool> {
        if !self.session_file.exists() {
            debug!(path = %self.session_file.display(), "no persisted session to restore");
            return Ok(false);
        }
        let content = tokio::fs::read_to_string(&self.session_file).await?;
        match serde_json::from_str::<SessionState>(&content) {
            Ok(state) => {
                info!(
                    path = %self.session_file.display(),
                    cookies = state.cookies.len(),
                    "restored persisted session"
                );
                self.state = state;
                Ok(true)
            }
            Err(err) => {
                // a corrupt session file is recoverable: start fresh
                warn!(%err, "session file unreadable, starting fresh");
                self.state = SessionState::default();
                Ok(false)
            }
        }
    }

    /// Persist the current state to the session file
    pub async fn save(&mut self) -> OrchestrateResult<()> {
        self.state.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.state)?;
        tokio::fs::write(&self.session_file, json).await?;
        debug!(path = %self.session_file.display(), "session saved");
        Ok(())
    }

    /// Whether the persisted state carries an authenticated session marker
    pub fn is_authenticated(&self) -> bool {
        self.state
            .cookies
            .iter()
            .any(|(key, value)| !value.is_empty() && (key.contains("session") || key.contains("auth")))
    }

    /// Save and release; further use is a logic error
    pub async fn close(&mut self) -> OrchestrateResult<()> {
        if !self.open {
            return Ok(());
        }
        self.save().await?;
        self.open = false;
        debug!("session manager closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut manager = SessionManager::create(&path).await.unwrap();
        manager
            .state_mut()
            .cookies
            .insert("vault_session".into(), "abc123".into());
        manager.save().await.unwrap();

        let mut restored = SessionManager::create(&path).await.unwrap();
        assert!(restored.restore().await.unwrap());
        assert_eq!(
            restored.state().cookies.get("vault_session").unwrap(),
            "abc123"
        );
        assert!(restored.is_authenticated());
    }

    #[tokio::test]
    async fn corrupt_session_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let mut manager = SessionManager::create(&path).await.unwrap();
        assert!(!manager.restore().await.unwrap());
        assert!(manager.state().cookies.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut manager = SessionManager::create(&path).await.unwrap();
        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(!manager.is_open());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn empty_state_is_not_authenticated() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::create(dir.path().join("s.json")).await.unwrap();
        assert!(!manager.is_authenticated());
    }
}
