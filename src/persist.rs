//! Credential persistence into a shell profile file
//!
//! One deterministic backup per run (a fixed name, overwritten each time,
//! so backups never accumulate), then an update-or-append of the export
//! line, a read-back verification, and owner-only permissions.

use crate::errors::{OrchestrateError, OrchestrateResult};
use crate::types::SecretToken;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of persisting the credential
#[derive(Debug, Clone, Serialize)]
pub struct PersistOutcome {
    /// Backup written this run, if the profile file already existed
    pub backup_path: Option<PathBuf>,

    /// Export line found in the file after writing
    pub verified: bool,
}

/// Deterministic backup path for a profile file
pub fn backup_path_for(profile: &Path) -> PathBuf {
    let mut name = profile
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "profile".to_string());
    name.push_str(".credmint.bak");
    profile.with_file_name(name)
}

/// Append or update `export NAME="token"` in the profile file
///
/// The backup is written before any modification; a failed write restores
/// from it.
pub async fn save_token_to_profile(
    profile: &Path,
    env_var: &str,
    token: &SecretToken,
) -> OrchestrateResult<PersistOutcome> {
    if env_var.is_empty() || !env_var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OrchestrateError::Validation(format!(
            "invalid environment variable name: {env_var:?}"
        )));
    }

    let existing = match tokio::fs::read_to_string(profile).await {
        Ok(content) => Some(content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    // one backup per run, fixed name
    let backup = if let Some(content) = existing.as_deref() {
        let path = backup_path_for(profile);
        tokio::fs::write(&path, content).await?;
        debug!(backup = %path.display(), "profile backup written");
        Some(path)
    } else {
        if let Some(parent) = profile.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        None
    };

    let export_line = format!("export {env_var}=\"{}\"", token.reveal());
    let pattern = Regex::new(&format!(r"(?m)^export {}=.*$", regex::escape(env_var)))
        .map_err(|err| OrchestrateError::Internal(format!("export pattern: {err}")))?;

    let mut content = existing.unwrap_or_default();
    if pattern.is_match(&content) {
        info!(var = env_var, "updating existing export line");
        content = pattern.replace(&content, export_line.as_str()).into_owned();
    } else {
        info!(var = env_var, "appending export line");
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str("\n# service account credential (managed by credmint)\n");
        content.push_str(&export_line);
        content.push('\n');
    }

    if let Err(err) = tokio::fs::write(profile, &content).await {
        if let Some(backup) = backup.as_deref() {
            if let Ok(previous) = tokio::fs::read_to_string(backup).await {
                if tokio::fs::write(profile, previous).await.is_ok() {
                    warn!("restored profile from backup after failed write");
                }
            }
        }
        return Err(err.into());
    }

    let verified = tokio::fs::read_to_string(profile)
        .await
        .map(|written| written.contains(token.reveal()))
        .unwrap_or(false);
    if !verified {
        warn!("export line missing on read-back");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) =
            tokio::fs::set_permissions(profile, std::fs::Permissions::from_mode(0o600)).await
        {
            warn!(%err, "failed to restrict profile permissions");
        }
    }

    info!(
        profile = %profile.display(),
        token = %token,
        "credential persisted"
    );
    Ok(PersistOutcome {
        backup_path: backup,
        verified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn token() -> SecretToken {
        SecretToken::new(format!("ops_{}", "t".repeat(120)))
    }

    #[tokio::test]
    async fn appends_export_line_and_backs_up() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join(".zshrc");
        tokio::fs::write(&profile, "alias ll='ls -l'\n").await.unwrap();

        let outcome = save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();
        assert!(outcome.verified);

        let backup = outcome.backup_path.unwrap();
        assert_eq!(backup, backup_path_for(&profile));
        assert_eq!(
            tokio::fs::read_to_string(&backup).await.unwrap(),
            "alias ll='ls -l'\n"
        );

        let written = tokio::fs::read_to_string(&profile).await.unwrap();
        assert!(written.contains("alias ll"));
        assert!(written.contains(&format!("export VAULT_TOKEN=\"{}\"", token().reveal())));
    }

    #[tokio::test]
    async fn updates_existing_export_in_place() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join(".zshrc");
        tokio::fs::write(&profile, "export VAULT_TOKEN=\"old\"\nalias x=y\n")
            .await
            .unwrap();

        save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&profile).await.unwrap();
        assert!(!written.contains("\"old\""));
        assert_eq!(written.matches("export VAULT_TOKEN=").count(), 1);
    }

    #[tokio::test]
    async fn missing_profile_is_created_without_backup() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join("shell").join(".zshrc");

        let outcome = save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();
        assert!(outcome.backup_path.is_none());
        assert!(profile.exists());
    }

    #[tokio::test]
    async fn repeated_runs_keep_exactly_one_backup() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join(".zshrc");
        tokio::fs::write(&profile, "# one\n").await.unwrap();

        save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();
        save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".credmint.bak"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn rejects_shell_unsafe_variable_names() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join(".zshrc");
        let err = save_token_to_profile(&profile, "BAD NAME; rm", &token())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrateError::Validation(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn profile_ends_up_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let profile = dir.path().join(".zshrc");

        save_token_to_profile(&profile, "VAULT_TOKEN", &token())
            .await
            .unwrap();

        let mode = std::fs::metadata(&profile).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
