//! External credential verification
//!
//! The minted token is proven usable by handing it to an external command
//! (the vault CLI's whoami equivalent) through the environment and reading
//! back the identity it reports.

use crate::errors::{OrchestrateError, OrchestrateResult};
use crate::types::SecretToken;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::info;

/// Proves a credential works; returns the identity it authenticates as
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, token: &SecretToken) -> OrchestrateResult<String>;
}

/// Default verifier: a subprocess with the token in its environment
pub struct CommandVerifier {
    command: Vec<String>,
    env_var: String,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(command: Vec<String>, env_var: impl Into<String>) -> Self {
        Self {
            command,
            env_var: env_var.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, token: &SecretToken) -> OrchestrateResult<String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(OrchestrateError::Validation(
                "verify command is empty".into(),
            ));
        };

        let mut child = Command::new(program)
            .args(args)
            .env(&self.env_var, token.reveal())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                OrchestrateError::Validation(format!("verify command unavailable: {err}"))
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(OrchestrateError::timeout(
                    "token verification",
                    self.timeout.as_millis() as u64,
                ));
            }
        };

        let mut out = String::new();
        if let Some(pipe) = stdout.as_mut() {
            let _ = pipe.read_to_string(&mut out).await;
        }

        if !status.success() {
            let mut err_text = String::new();
            if let Some(pipe) = stderr.as_mut() {
                let _ = pipe.read_to_string(&mut err_text).await;
            }
            return Err(OrchestrateError::Validation(format!(
                "verification command exited with {status}: {}",
                err_text.trim()
            )));
        }

        let identity = out.lines().next().unwrap_or("").trim().to_string();
        if identity.is_empty() {
            return Err(OrchestrateError::Validation(
                "verification command produced no identity".into(),
            ));
        }

        info!(identity = %identity, "token verified");
        Ok(identity)
    }
}
