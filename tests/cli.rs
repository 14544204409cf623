//! Command line smoke tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn valid_token() -> String {
    format!("ops_{}", "a1B2c3D4".repeat(16))
}

fn write_config(dir: &Path, probe: &str) -> PathBuf {
    let path = dir.join("credmint.yaml");
    let yaml = format!(
        concat!(
            "probe_command: [\"{probe}\"]\n",
            "verify_command: [\"echo\", \"ci-bot@vault.example.com\"]\n",
            "session_file: \"{dir}/session.json\"\n",
            "profile_file: \"{dir}/.zshrc\"\n",
        ),
        probe = probe,
        dir = dir.display(),
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn validate_accepts_a_grammar_valid_token() {
    Command::cargo_bin("credmint")
        .unwrap()
        .args(["validate", &valid_token()])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_rejects_short_tokens() {
    Command::cargo_bin("credmint")
        .unwrap()
        .args(["validate", "ops_tooshort"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"));
}

#[test]
fn validate_emits_json_when_asked() {
    let output = Command::cargo_bin("credmint")
        .unwrap()
        .args(["validate", "nope", "--output", "json"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let check: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(check["is_valid"], false);
    assert_eq!(check["prefix_ok"], false);
}

#[test]
fn check_auth_fails_without_a_session() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "false");

    Command::cargo_bin("credmint")
        .unwrap()
        .args(["check-auth", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("authenticated=false"));
}

#[test]
fn check_auth_succeeds_with_a_cli_session() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "true");

    Command::cargo_bin("credmint")
        .unwrap()
        .args(["check-auth", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("method=cli"));
}

#[test]
fn create_runs_the_scripted_wizard_end_to_end() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "true");

    let output = Command::cargo_bin("credmint")
        .unwrap()
        .args(["create", "--account", "ci-bot", "--output", "json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["final_state"], "complete");
    assert_eq!(result["account_name"], "ci-bot");

    // the serialized token is the redacted form
    let token = result["token"].as_str().unwrap();
    assert!(token.contains("..."));
    assert!(token.len() < 30);

    let profile = std::fs::read_to_string(dir.path().join(".zshrc")).unwrap();
    assert!(profile.contains("export OP_SERVICE_ACCOUNT_TOKEN="));
}

#[test]
fn create_reports_failure_when_auth_is_missing() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "false");

    Command::cargo_bin("credmint")
        .unwrap()
        .args(["create", "--account", "ci-bot", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"));
}
