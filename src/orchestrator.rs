//! Workflow orchestration state machine
//!
//! Drives the fixed state sequence INIT → ... → COMPLETE, consulting the
//! decision engine in autonomous mode, wrapping the timing-sensitive steps
//! in classified retries, and guaranteeing that CLEANUP runs exactly once
//! on every exit path — success, failure or cancellation — before the
//! terminal state is recorded.

use crate::auth::{AuthProbe, CommandProbe};
use crate::browser::{BrowserDriver, ScriptedDriver};
use crate::config::OrchestratorConfig;
use crate::decision::{ActionKind, DecisionEngine, Intent};
use crate::errors::{OrchestrateError, OrchestrateResult};
use crate::extract::{validate_token_format, TokenExtractor, TokenGrammar};
use crate::persist::save_token_to_profile;
use crate::retry::retry_step;
use crate::session::SessionManager;
use crate::types::{
    AuthStatus, OrchestrationResult, OrchestrationState, SecretToken, StepReport,
};
use crate::ui::UiController;
use crate::verify::{CommandVerifier, Verifier};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

type SharedDriver = Arc<Mutex<Box<dyn BrowserDriver>>>;

/// External collaborators consumed through their interface boundaries
pub struct Collaborators {
    pub probe: Arc<dyn AuthProbe>,
    pub driver: SharedDriver,
    pub verifier: Arc<dyn Verifier>,
    /// OS-level fallback, consulted only in autonomous mode
    pub ui: Option<Arc<dyn UiController>>,
}

impl Collaborators {
    pub fn new(
        probe: Arc<dyn AuthProbe>,
        driver: Box<dyn BrowserDriver>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            probe,
            driver: Arc::new(Mutex::new(driver)),
            verifier,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiController>) -> Self {
        self.ui = Some(ui);
        self
    }
}

/// Mutable state exclusively owned by one orchestration run
pub struct OrchestrationContext {
    pub run_id: Uuid,
    pub account_name: String,
    pub vaults: Vec<String>,
    pub headless: bool,
    pub current_state: OrchestrationState,
    pub state_transitions: Vec<OrchestrationState>,
    pub session: Option<SessionManager>,
    pub auth_status: Option<AuthStatus>,
    pub token: Option<SecretToken>,
    pub started_at: DateTime<Utc>,
    start: Instant,
    pub validated: bool,
    pub saved: bool,
    pub tested: bool,
}

impl OrchestrationContext {
    fn new(account_name: &str, vaults: &[String], headless: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            account_name: account_name.to_string(),
            vaults: vaults.to_vec(),
            headless,
            current_state: OrchestrationState::Init,
            state_transitions: vec![OrchestrationState::Init],
            session: None,
            auth_status: None,
            token: None,
            started_at: Utc::now(),
            start: Instant::now(),
            validated: false,
            saved: false,
            tested: false,
        }
    }

    /// Append-only transition with logging
    fn transition(&mut self, state: OrchestrationState) {
        info!(from = %self.current_state, to = %state, "state transition");
        self.current_state = state;
        self.state_transitions.push(state);
    }

    fn into_result(self, success: bool, error_message: Option<String>) -> OrchestrationResult {
        OrchestrationResult {
            run_id: self.run_id,
            success,
            account_name: self.account_name,
            token: self.token,
            error_message,
            started_at: self.started_at,
            duration_ms: self.start.elapsed().as_millis() as u64,
            final_state: self.current_state,
            state_transitions: self.state_transitions,
            auth_status: self.auth_status,
            validated: self.validated,
            saved: self.saved,
            tested: self.tested,
        }
    }
}

/// The orchestration core: one call, one run, one result
pub struct Orchestrator {
    config: OrchestratorConfig,
    engine: DecisionEngine,
    extractor: Arc<TokenExtractor>,
    collab: Collaborators,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, collab: Collaborators) -> Self {
        let grammar = TokenGrammar::new(config.token_prefix.clone(), config.token_min_len);
        Self {
            config,
            engine: DecisionEngine::new(),
            extractor: Arc::new(TokenExtractor::new(grammar)),
            collab,
            cancel: CancellationToken::new(),
        }
    }

    /// Default collaborators: command probe/verifier from the config plus
    /// the scripted wizard backend
    pub fn with_default_collaborators(config: OrchestratorConfig) -> Self {
        let probe = Arc::new(
            CommandProbe::new(config.probe_command.clone())
                .with_browser_marker(config.session_file.clone()),
        );
        let verifier = Arc::new(CommandVerifier::new(
            config.verify_command.clone(),
            config.env_var.clone(),
        ));
        let driver: Box<dyn BrowserDriver> = Box::new(ScriptedDriver::with_generated_token());
        Self::new(config, Collaborators::new(probe, driver, verifier))
    }

    /// Replace the extractor (e.g. to attach an OCR backend)
    pub fn with_extractor(mut self, extractor: TokenExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Token that cancels the run; cancellation still triggers cleanup
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Full workflow orchestration, the main entry point
    ///
    /// Never returns an error: every internal failure becomes a failed
    /// result with a populated error message and `final_state == Error`,
    /// after cleanup has executed.
    pub async fn orchestrate(
        &mut self,
        account_name: &str,
        vaults: &[String],
        headless: bool,
    ) -> OrchestrationResult {
        let mut ctx = OrchestrationContext::new(account_name, vaults, headless);
        info!(
            run = %ctx.run_id,
            account = account_name,
            vaults = vaults.len(),
            headless,
            autonomous = self.config.autonomous,
            "starting orchestration"
        );

        let outcome = self.run_states(&mut ctx).await;
        let failed_during = ctx.current_state;

        // cleanup runs exactly once, on every path, before the terminal state
        ctx.transition(OrchestrationState::Cleanup);
        if let Err(err) = self.cleanup(&mut ctx).await {
            warn!(%err, "cleanup failed (non-fatal)");
        }

        match outcome {
            Ok(()) => {
                ctx.transition(OrchestrationState::Complete);
                info!(run = %ctx.run_id, "orchestration complete");
                ctx.into_result(true, None)
            }
            Err(err) => {
                let message = format!("{} failed: {err}", phase_label(failed_during));
                ctx.transition(OrchestrationState::Error);
                warn!(run = %ctx.run_id, error = %message, "orchestration failed");
                ctx.into_result(false, Some(message))
            }
        }
    }

    async fn run_states(&mut self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        if ctx.account_name.trim().is_empty() {
            return Err(OrchestrateError::Validation(
                "account name must not be empty".into(),
            ));
        }
        if ctx.vaults.is_empty() {
            return Err(OrchestrateError::Validation(
                "at least one vault is required".into(),
            ));
        }

        ctx.transition(OrchestrationState::CheckAuth);
        self.check_auth(ctx).await?;

        ctx.transition(OrchestrationState::SessionInit);
        self.init_session(ctx).await?;

        ctx.transition(OrchestrationState::BrowserOpen);
        self.open_browser(ctx).await?;

        ctx.transition(OrchestrationState::Navigate);
        self.navigate(ctx).await?;

        ctx.transition(OrchestrationState::FillForm);
        self.fill_form(ctx).await?;

        ctx.transition(OrchestrationState::WizardNav);
        self.navigate_wizard(ctx).await?;

        ctx.transition(OrchestrationState::ExtractToken);
        self.extract_token(ctx).await?;

        ctx.transition(OrchestrationState::ValidateToken);
        self.validate_token(ctx)?;

        ctx.transition(OrchestrationState::SaveToken);
        self.save_token(ctx).await?;

        ctx.transition(OrchestrationState::TestToken);
        self.test_token(ctx).await?;

        Ok(())
    }

    /// CHECK_AUTH: probe the prerequisite session (retry-wrapped; a
    /// negative answer is structural and fails fast)
    async fn check_auth(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let probe = Arc::clone(&self.collab.probe);
        let status = retry_step(
            "check_auth",
            &self.engine,
            self.config.max_retries,
            &self.cancel,
            move || {
                let probe = probe.clone();
                async move { probe.check().await }
            },
        )
        .await?;

        ctx.auth_status = Some(status.clone());
        if !status.authenticated {
            return Err(OrchestrateError::NotAuthenticated {
                method: status.detected_method,
                confidence: status.confidence_score * 100.0,
            });
        }
        Ok(())
    }

    /// SESSION_INIT: resource acquisition, fatal immediately on failure
    async fn init_session(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let mut session = SessionManager::create(self.config.session_file.clone()).await?;
        session.restore().await?;
        ctx.session = Some(session);
        Ok(())
    }

    /// BROWSER_OPEN: resource acquisition, fatal immediately on failure
    async fn open_browser(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let mut driver = self.collab.driver.lock().await;
        driver
            .open(ctx.headless)
            .await
            .map_err(|err| OrchestrateError::resource("browser", err.to_string()))
    }

    /// NAVIGATE: reach the wizard entry point (retry-wrapped)
    async fn navigate(&self, _ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let driver = Arc::clone(&self.collab.driver);
        let engine = self.engine.clone();
        let url = self.config.target_url.clone();
        let timeout_ms = self.config.step_timeout_ms;

        retry_step(
            "navigate",
            &self.engine,
            self.config.max_retries,
            &self.cancel,
            move || {
                let driver = driver.clone();
                let engine = engine.clone();
                let url = url.clone();
                async move {
                    let report = with_deadline("navigate", timeout_ms, async {
                        driver.lock().await.navigate(&url).await
                    })
                    .await?;
                    judge_report(&engine, "navigate", report, timeout_ms)
                }
            },
        )
        .await
    }

    /// FILL_FORM: scripted form fill, or decision-engine-driven fills in
    /// autonomous mode (retry-wrapped)
    async fn fill_form(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let driver = Arc::clone(&self.collab.driver);
        let ui = self.collab.ui.clone();
        let engine = self.engine.clone();
        let autonomous = self.config.autonomous;
        let timeout_ms = self.config.step_timeout_ms;
        let account = ctx.account_name.clone();
        let vaults = ctx.vaults.clone();

        retry_step(
            "fill_form",
            &self.engine,
            self.config.max_retries,
            &self.cancel,
            move || {
                let driver = driver.clone();
                let ui = ui.clone();
                let engine = engine.clone();
                let account = account.clone();
                let vaults = vaults.clone();
                async move {
                    let report = if autonomous {
                        fill_form_autonomous(&driver, ui.as_deref(), &engine, &account, &vaults, timeout_ms)
                            .await?
                    } else {
                        with_deadline("fill_form", timeout_ms, async {
                            driver.lock().await.fill_form(&account, &vaults).await
                        })
                        .await?
                    };
                    judge_report(&engine, "fill_form", report, timeout_ms)
                }
            },
        )
        .await
    }

    /// WIZARD_NAV: step to the credential display (retry-wrapped)
    async fn navigate_wizard(&self, _ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let driver = Arc::clone(&self.collab.driver);
        let ui = self.collab.ui.clone();
        let engine = self.engine.clone();
        let autonomous = self.config.autonomous;
        let max_steps = self.config.wizard_max_steps;
        let timeout_ms = self.config.step_timeout_ms;

        retry_step(
            "wizard_nav",
            &self.engine,
            self.config.max_retries,
            &self.cancel,
            move || {
                let driver = driver.clone();
                let ui = ui.clone();
                let engine = engine.clone();
                async move {
                    let report = if autonomous {
                        wizard_autonomous(&driver, ui.as_deref(), &engine, max_steps, timeout_ms)
                            .await?
                    } else {
                        with_deadline("wizard_nav", timeout_ms, async {
                            driver.lock().await.step_wizard(max_steps).await
                        })
                        .await?
                    };
                    judge_report(&engine, "wizard_nav", report, timeout_ms)
                }
            },
        )
        .await
    }

    /// EXTRACT_TOKEN: run the strategy chain once per attempt
    /// (retry-wrapped for timing problems; a clean miss is structural and
    /// fails fast)
    async fn extract_token(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let driver = Arc::clone(&self.collab.driver);
        let extractor = Arc::clone(&self.extractor);
        let timeout_ms = self.config.step_timeout_ms;

        let raw = retry_step(
            "extract_token",
            &self.engine,
            self.config.max_retries,
            &self.cancel,
            move || {
                let driver = driver.clone();
                let extractor = extractor.clone();
                async move {
                    with_deadline("extract_token", timeout_ms, async {
                        let mut guard = driver.lock().await;
                        extractor.extract(guard.as_mut()).await
                    })
                    .await
                }
            },
        )
        .await?;

        let token = SecretToken::new(raw);
        info!(token = %token, "token extracted");
        ctx.token = Some(token);
        Ok(())
    }

    /// VALIDATE_TOKEN: pure computation, deliberately not retry-wrapped
    fn validate_token(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let token = ctx
            .token
            .as_ref()
            .ok_or_else(|| OrchestrateError::Validation("no token to validate".into()))?;

        let check = validate_token_format(token.reveal(), self.extractor.grammar());
        if !check.is_valid {
            return Err(OrchestrateError::Validation(format!(
                "token format invalid: {}",
                check.errors.join("; ")
            )));
        }
        ctx.validated = true;
        Ok(())
    }

    /// SAVE_TOKEN: backup + export line in the profile file
    async fn save_token(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let token = ctx
            .token
            .as_ref()
            .ok_or_else(|| OrchestrateError::Validation("no token to save".into()))?;

        let outcome =
            save_token_to_profile(&self.config.profile_file, &self.config.env_var, token).await?;
        if let Some(backup) = &outcome.backup_path {
            info!(backup = %backup.display(), "profile backed up");
        }
        ctx.saved = true;
        Ok(())
    }

    /// TEST_TOKEN: prove the credential with the external verifier
    async fn test_token(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let token = ctx
            .token
            .as_ref()
            .ok_or_else(|| OrchestrateError::Validation("no token to test".into()))?;

        let identity = self.collab.verifier.verify(token).await?;
        info!(identity = %identity, "token verification passed");
        ctx.tested = true;
        Ok(())
    }

    /// Release browser and session resources; callers treat failures as
    /// warnings only
    async fn cleanup(&self, ctx: &mut OrchestrationContext) -> OrchestrateResult<()> {
        let mut problems = Vec::new();

        if let Err(err) = self.collab.driver.lock().await.close().await {
            problems.push(format!("browser close: {err}"));
        }

        if let Some(session) = ctx.session.as_mut() {
            if let Err(err) = session.close().await {
                problems.push(format!("session close: {err}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrchestrateError::Cleanup(problems.join("; ")))
        }
    }
}

/// Decision-engine-driven form fill: one field at a time, OS-level paste
/// first when a UI controller is present, DOM fill as the fallback
async fn fill_form_autonomous(
    driver: &SharedDriver,
    ui: Option<&dyn UiController>,
    engine: &DecisionEngine,
    account: &str,
    vaults: &[String],
    timeout_ms: u64,
) -> OrchestrateResult<StepReport> {
    let fields: Vec<(String, String)> = vec![
        ("name".to_string(), account.to_string()),
        ("vault".to_string(), vaults.join(", ")),
    ];

    for (field, value) in fields {
        let page = with_deadline("snapshot", timeout_ms, async {
            driver
                .lock()
                .await
                .snapshot(Intent::Fill {
                    fields: BTreeMap::from([(field.clone(), value.clone())]),
                })
                .await
        })
        .await?;

        let action = engine.decide_next_action(&page);
        match action.kind {
            ActionKind::Fill => {
                let target = action.target.as_deref().unwrap_or_default();
                if let Some(ui) = ui {
                    if ui.paste_text("browser", &field, &value).await {
                        continue;
                    }
                    // UI controller declined; fall back to the DOM primitive
                }
                let report = with_deadline("fill", timeout_ms, async {
                    driver.lock().await.fill(target, &value).await
                })
                .await?;
                if !report.success {
                    return Ok(report);
                }
            }
            ActionKind::Retry => {
                return Err(OrchestrateError::timeout(
                    format!("form field '{field}' not ready ({})", action.reason),
                    timeout_ms,
                ));
            }
            other => {
                return Err(OrchestrateError::Internal(format!(
                    "unexpected action {other:?} while filling form"
                )));
            }
        }
    }

    Ok(StepReport::ok("form filled via decision engine"))
}

/// Decision-engine-driven wizard stepping until the credential display is
/// located or the step budget is exhausted
async fn wizard_autonomous(
    driver: &SharedDriver,
    ui: Option<&dyn UiController>,
    engine: &DecisionEngine,
    max_steps: u32,
    timeout_ms: u64,
) -> OrchestrateResult<StepReport> {
    for step in 0..=max_steps {
        let probe = with_deadline("snapshot", timeout_ms, async {
            driver.lock().await.snapshot(Intent::Extract).await
        })
        .await?;
        if engine.decide_next_action(&probe).kind == ActionKind::Extract {
            return Ok(StepReport::ok(format!(
                "credential display reached after {step} step(s)"
            )));
        }

        if step == max_steps {
            break;
        }

        let page = with_deadline("snapshot", timeout_ms, async {
            driver
                .lock()
                .await
                .snapshot(Intent::advance_defaults())
                .await
        })
        .await?;
        let action = engine.decide_next_action(&page);
        match action.kind {
            ActionKind::Click => {
                let target = action.target.as_deref().unwrap_or_default();
                let clicked_via_ui = match ui {
                    Some(ui) => ui.click_by_label("browser", target).await,
                    None => false,
                };
                if !clicked_via_ui {
                    let report = with_deadline("click", timeout_ms, async {
                        driver.lock().await.click(target).await
                    })
                    .await?;
                    if !report.success {
                        return Ok(report);
                    }
                }
            }
            ActionKind::Retry => {
                return Err(OrchestrateError::timeout(
                    format!("wizard page not ready ({})", action.reason),
                    timeout_ms,
                ));
            }
            other => {
                return Err(OrchestrateError::Internal(format!(
                    "unexpected action {other:?} during wizard navigation"
                )));
            }
        }
    }

    Err(OrchestrateError::timeout(
        format!("credential display not reached within {max_steps} wizard steps"),
        timeout_ms,
    ))
}

/// Every wait gets an explicit deadline
async fn with_deadline<T>(
    operation: &str,
    timeout_ms: u64,
    fut: impl Future<Output = OrchestrateResult<T>>,
) -> OrchestrateResult<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestrateError::timeout(operation, timeout_ms)),
    }
}

/// Judge a driver report inside the retried step, so reported failures are
/// classified and retried like raised ones
fn judge_report(
    engine: &DecisionEngine,
    step: &str,
    report: StepReport,
    timeout_ms: u64,
) -> OrchestrateResult<()> {
    if engine.evaluate_result(&report) {
        return Ok(());
    }
    let text = report.message.to_lowercase();
    if text.contains("timeout") || text.contains("timed out") {
        Err(OrchestrateError::timeout(step, timeout_ms))
    } else if text.contains("connection") || text.contains("network") {
        Err(OrchestrateError::network(step, report.message))
    } else {
        Err(OrchestrateError::Internal(format!(
            "{step}: {}",
            report.message
        )))
    }
}

/// Plain-language phase names for user-visible error messages
fn phase_label(state: OrchestrationState) -> &'static str {
    match state {
        OrchestrationState::Init => "initialization",
        OrchestrationState::CheckAuth => "authentication check",
        OrchestrationState::SessionInit => "session initialization",
        OrchestrationState::BrowserOpen => "browser launch",
        OrchestrationState::Navigate => "navigation",
        OrchestrationState::FillForm => "form filling",
        OrchestrationState::WizardNav => "wizard navigation",
        OrchestrationState::ExtractToken => "credential extraction",
        OrchestrationState::ValidateToken => "credential validation",
        OrchestrationState::SaveToken => "credential persistence",
        OrchestrationState::TestToken => "credential verification",
        OrchestrationState::Cleanup => "cleanup",
        OrchestrationState::Complete => "completion",
        OrchestrationState::Error => "error handling",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> OrchestratorConfig {
        OrchestratorConfig {
            session_file: dir.join("session.json"),
            profile_file: dir.join(".zshrc"),
            probe_command: vec!["true".into()],
            verify_command: vec!["echo".into(), "ci-bot@vault".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scripted_happy_path_completes() {
        let dir = tempdir().unwrap();
        let mut orchestrator =
            Orchestrator::with_default_collaborators(test_config(dir.path()));

        let result = orchestrator
            .orchestrate("ci-bot", &["automation".into()], true)
            .await;

        assert!(result.success, "unexpected failure: {:?}", result.error_message);
        assert_eq!(result.final_state, OrchestrationState::Complete);
        assert!(result.token.is_some());
        assert!(result.validated && result.saved && result.tested);
        assert_eq!(result.state_transitions[0], OrchestrationState::Init);
        assert_eq!(
            result.state_transitions.last().copied(),
            Some(result.final_state)
        );
        assert!(dir.path().join(".zshrc").exists());
    }

    #[tokio::test]
    async fn autonomous_mode_completes_via_decision_engine() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig {
            autonomous: true,
            ..test_config(dir.path())
        };
        let mut orchestrator = Orchestrator::with_default_collaborators(config);

        let result = orchestrator
            .orchestrate("ci-bot", &["automation".into()], true)
            .await;

        assert!(result.success, "unexpected failure: {:?}", result.error_message);
        assert!(result.state_transitions.contains(&OrchestrationState::WizardNav));
    }

    #[tokio::test]
    async fn empty_account_name_fails_before_check_auth() {
        let dir = tempdir().unwrap();
        let mut orchestrator =
            Orchestrator::with_default_collaborators(test_config(dir.path()));

        let result = orchestrator.orchestrate("", &["automation".into()], true).await;

        assert!(!result.success);
        assert_eq!(result.final_state, OrchestrationState::Error);
        assert!(!result
            .state_transitions
            .contains(&OrchestrationState::CheckAuth));
        // cleanup still ran
        assert_eq!(
            result
                .state_transitions
                .iter()
                .filter(|s| **s == OrchestrationState::Cleanup)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn empty_vault_list_is_rejected() {
        let dir = tempdir().unwrap();
        let mut orchestrator =
            Orchestrator::with_default_collaborators(test_config(dir.path()));

        let result = orchestrator.orchestrate("ci-bot", &[], true).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("vault"));
    }

    #[tokio::test]
    async fn phase_label_names_every_state() {
        // error messages must name the failing phase in plain language
        assert_eq!(
            phase_label(OrchestrationState::ExtractToken),
            "credential extraction"
        );
        assert_eq!(phase_label(OrchestrationState::CheckAuth), "authentication check");
    }
}
