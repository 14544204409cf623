//! Orchestrator configuration
//!
//! Loaded from a YAML file (`./config/credmint.yaml` or the user config
//! directory), with environment variable overrides for the common knobs.

use crate::errors::{OrchestrateError, OrchestrateResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

fn default_max_retries() -> u32 {
    3
}

fn default_session_file() -> PathBuf {
    env::temp_dir().join("credmint-session.json")
}

fn default_profile_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(".zshrc")
}

fn default_env_var() -> String {
    "OP_SERVICE_ACCOUNT_TOKEN".to_string()
}

fn default_target_url() -> String {
    "https://my.1password.com/developer-tools/infrastructure-secrets/serviceaccount/".to_string()
}

fn default_wizard_max_steps() -> u32 {
    5
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_probe_command() -> Vec<String> {
    vec!["op".into(), "whoami".into()]
}

fn default_verify_command() -> Vec<String> {
    vec!["op".into(), "whoami".into()]
}

fn default_token_prefix() -> String {
    "ops_".to_string()
}

fn default_token_min_len() -> usize {
    100
}

/// Recognized configuration options for an orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Let the decision engine and UI controller drive navigation instead of
    /// purely scripted stepping
    pub autonomous: bool,

    /// Per-step ceiling on retry attempts; caps whatever the retry strategy
    /// asks for
    #[serde(rename = "max_retries")]
    pub max_retries: u32,

    /// Persisted browser session state (cookies/local storage)
    pub session_file: PathBuf,

    /// Shell profile file that receives the credential export line
    pub profile_file: PathBuf,

    /// Environment variable name used for the export line and verification
    pub env_var: String,

    /// Wizard entry point
    pub target_url: String,

    /// Upper bound on wizard pages to step through
    pub wizard_max_steps: u32,

    /// Deadline applied to every driver/probe wait
    pub step_timeout_ms: u64,

    /// Command used by the auth probe (argv form)
    pub probe_command: Vec<String>,

    /// Command used to verify the minted token (argv form)
    pub verify_command: Vec<String>,

    /// Credential grammar: required prefix
    pub token_prefix: String,

    /// Credential grammar: minimum total length
    pub token_min_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            autonomous: false,
            max_retries: default_max_retries(),
            session_file: default_session_file(),
            profile_file: default_profile_file(),
            env_var: default_env_var(),
            target_url: default_target_url(),
            wizard_max_steps: default_wizard_max_steps(),
            step_timeout_ms: default_step_timeout_ms(),
            probe_command: default_probe_command(),
            verify_command: default_verify_command(),
            token_prefix: default_token_prefix(),
            token_min_len: default_token_min_len(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from an explicit path, or from the default
    /// locations (`./config/credmint.yaml`, then the user config dir)
    pub async fn load(config_path: Option<&PathBuf>) -> OrchestrateResult<Self> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => {
                let local = PathBuf::from("config/credmint.yaml");
                if local.exists() {
                    local
                } else {
                    let mut path = dirs::config_dir().unwrap_or_else(env::temp_dir);
                    path.push("credmint");
                    path.push("credmint.yaml");
                    path
                }
            }
        };

        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let config: Self = serde_yaml::from_str(&content).map_err(|err| {
                OrchestrateError::Validation(format!(
                    "invalid config file {}: {err}",
                    path.display()
                ))
            })?;
            info!(path = %path.display(), "loaded configuration");
            config
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables override file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var("CREDMINT_MAX_RETRIES") {
            match raw.parse::<u32>() {
                Ok(value) => self.max_retries = value,
                Err(_) => warn!(value = %raw, "ignoring invalid CREDMINT_MAX_RETRIES"),
            }
        }
        if let Ok(raw) = env::var("CREDMINT_SESSION_FILE") {
            self.session_file = PathBuf::from(raw);
        }
        if let Ok(raw) = env::var("CREDMINT_AUTONOMOUS") {
            if let Ok(value) = raw.parse::<bool>() {
                self.autonomous = value;
            }
        }
        if let Ok(raw) = env::var("CREDMINT_TARGET_URL") {
            self.target_url = raw;
        }
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> OrchestrateResult<()> {
        if self.probe_command.is_empty() {
            return Err(OrchestrateError::Validation(
                "probe_command must not be empty".into(),
            ));
        }
        if self.verify_command.is_empty() {
            return Err(OrchestrateError::Validation(
                "verify_command must not be empty".into(),
            ));
        }
        if self.token_prefix.is_empty() {
            return Err(OrchestrateError::Validation(
                "token_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.token_prefix, "ops_");
        assert!(!config.autonomous);
    }

    #[test]
    fn yaml_round_trip_keeps_overrides() {
        let yaml = "autonomous: true\nmax_retries: 7\nwizard_max_steps: 2\n";
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.autonomous);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.wizard_max_steps, 2);
        // untouched fields fall back to defaults
        assert_eq!(config.token_min_len, 100);
    }

    #[test]
    fn empty_probe_command_is_rejected() {
        let config = OrchestratorConfig {
            probe_command: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
