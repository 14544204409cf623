//! Browser driver boundary
//!
//! The orchestrator drives one browser page through this trait; which
//! automation backend sits behind it (CDP, WebDriver, ...) is deliberately
//! not prescribed. [`ScriptedDriver`] is the built-in backend: an in-memory
//! simulated wizard used by the demo mode and the test suite.

use crate::decision::{Intent, PageState};
use crate::errors::{OrchestrateError, OrchestrateResult};
use crate::types::StepReport;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::debug;

/// One browser page: navigation, form-fill and wizard-stepping primitives
///
/// Every method suspends at the underlying I/O boundary and honors the
/// backend's own timeouts; reports carry diagnostic text instead of raising
/// for ordinary in-page failures.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Launch the browser page; failures here are fatal for the run
    async fn open(&mut self, headless: bool) -> OrchestrateResult<()>;

    /// Navigate to a URL
    async fn navigate(&mut self, url: &str) -> OrchestrateResult<StepReport>;

    /// Fill the wizard's account form
    async fn fill_form(
        &mut self,
        account_name: &str,
        vaults: &[String],
    ) -> OrchestrateResult<StepReport>;

    /// Step through wizard pages until the terminal page or `max_steps`
    async fn step_wizard(&mut self, max_steps: u32) -> OrchestrateResult<StepReport>;

    /// Structured snapshot of the current page for the decision engine
    async fn snapshot(&self, intent: Intent) -> OrchestrateResult<PageState>;

    /// Click one element by identifier
    async fn click(&mut self, target: &str) -> OrchestrateResult<StepReport>;

    /// Fill one element by identifier
    async fn fill(&mut self, target: &str, value: &str) -> OrchestrateResult<StepReport>;

    /// Text content of one element, if present
    async fn element_text(&self, target: &str) -> OrchestrateResult<Option<String>>;

    /// Full rendered page text
    async fn page_text(&self) -> OrchestrateResult<String>;

    /// System clipboard contents, if readable
    async fn read_clipboard(&self) -> OrchestrateResult<Option<String>>;

    /// Screenshot of the credential region, if the backend supports it
    async fn screenshot(&self) -> OrchestrateResult<Option<Vec<u8>>>;

    /// Release the page and browser resources
    async fn close(&mut self) -> OrchestrateResult<()>;
}

/// Wizard stages the scripted backend walks through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Closed,
    Blank,
    Form,
    Wizard,
    TokenShown,
}

/// In-memory simulated wizard
///
/// Behaves like the real flow: the form page exposes name/vault inputs, the
/// wizard advances on continue-clicks, the terminal page shows the token in
/// a code element with a copy button.
pub struct ScriptedDriver {
    token: String,
    stage: Stage,
    url: String,
    account_name: Option<String>,
    clipboard: Option<String>,
    wizard_steps_taken: u32,
}

impl ScriptedDriver {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            stage: Stage::Closed,
            url: String::new(),
            account_name: None,
            clipboard: None,
            wizard_steps_taken: 0,
        }
    }

    /// Driver whose wizard ends in a freshly generated grammar-valid token
    pub fn with_generated_token() -> Self {
        let body: String = uuid::Uuid::new_v4().simple().to_string().repeat(4);
        Self::new(format!("ops_{body}"))
    }

    fn require_open(&self) -> OrchestrateResult<()> {
        if self.stage == Stage::Closed {
            return Err(OrchestrateError::resource("browser", "page not open"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn open(&mut self, headless: bool) -> OrchestrateResult<()> {
        debug!(headless, "scripted driver: open");
        self.stage = Stage::Blank;
        self.url = "about:blank".into();
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> OrchestrateResult<StepReport> {
        self.require_open()?;
        self.url = url.to_string();
        self.stage = Stage::Form;
        Ok(StepReport::ok(format!("navigated to {url}")))
    }

    async fn fill_form(
        &mut self,
        account_name: &str,
        vaults: &[String],
    ) -> OrchestrateResult<StepReport> {
        self.require_open()?;
        if self.stage != Stage::Form {
            return Ok(StepReport::failed("form page not loaded"));
        }
        self.account_name = Some(account_name.to_string());
        self.stage = Stage::Wizard;
        Ok(StepReport::ok(format!(
            "filled form for {account_name} with {} vault(s)",
            vaults.len()
        )))
    }

    async fn step_wizard(&mut self, max_steps: u32) -> OrchestrateResult<StepReport> {
        self.require_open()?;
        if self.stage != Stage::Wizard {
            return Ok(StepReport::failed("wizard not started"));
        }
        // two confirmation pages before the token display
        let needed = 2u32.min(max_steps);
        self.wizard_steps_taken = needed;
        self.stage = Stage::TokenShown;
        Ok(StepReport::ok("wizard complete")
            .with_detail(json!({ "steps_taken": needed })))
    }

    async fn snapshot(&self, intent: Intent) -> OrchestrateResult<PageState> {
        self.require_open()?;
        let visible_elements: BTreeSet<String> = match self.stage {
            Stage::Closed | Stage::Blank => BTreeSet::new(),
            Stage::Form => ["input-service-account-name", "input-vault", "button-next"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Stage::Wizard => ["button-continue", "button-back"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Stage::TokenShown => ["code-token", "button-copy-token", "button-done"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        Ok(PageState {
            url: self.url.clone(),
            dom_snapshot: match self.stage {
                Stage::TokenShown => format!("save your token now {}", self.token),
                _ => "service account wizard".to_string(),
            },
            visible_elements,
            intent,
        })
    }

    async fn click(&mut self, target: &str) -> OrchestrateResult<StepReport> {
        self.require_open()?;
        match target {
            "button-copy-token" if self.stage == Stage::TokenShown => {
                self.clipboard = Some(self.token.clone());
                Ok(StepReport::ok("token copied to clipboard"))
            }
            "button-next" if self.stage == Stage::Form => {
                self.stage = Stage::Wizard;
                Ok(StepReport::ok("advanced to wizard"))
            }
            "button-continue" if self.stage == Stage::Wizard => {
                self.wizard_steps_taken += 1;
                if self.wizard_steps_taken >= 2 {
                    self.stage = Stage::TokenShown;
                }
                Ok(StepReport::ok("wizard step"))
            }
            _ => Err(OrchestrateError::not_found(
                "element",
                format!("{target} is not clickable on this page"),
            )),
        }
    }

    async fn fill(&mut self, target: &str, value: &str) -> OrchestrateResult<StepReport> {
        self.require_open()?;
        if self.stage != Stage::Form {
            return Err(OrchestrateError::not_found(
                "element",
                format!("{target} is not fillable on this page"),
            ));
        }
        if target == "input-service-account-name" {
            self.account_name = Some(value.to_string());
        }
        Ok(StepReport::ok(format!("filled {target}")))
    }

    async fn element_text(&self, target: &str) -> OrchestrateResult<Option<String>> {
        self.require_open()?;
        if self.stage == Stage::TokenShown && target == "code-token" {
            return Ok(Some(self.token.clone()));
        }
        Ok(None)
    }

    async fn page_text(&self) -> OrchestrateResult<String> {
        self.require_open()?;
        Ok(match self.stage {
            Stage::TokenShown => format!(
                "Service account created.\nSave this token now:\n  {}\n",
                self.token
            ),
            Stage::Form => "Create a service account".to_string(),
            _ => String::new(),
        })
    }

    async fn read_clipboard(&self) -> OrchestrateResult<Option<String>> {
        Ok(self.clipboard.clone())
    }

    async fn screenshot(&self) -> OrchestrateResult<Option<Vec<u8>>> {
        // the simulated wizard has no pixels
        Ok(None)
    }

    async fn close(&mut self) -> OrchestrateResult<()> {
        debug!("scripted driver: close");
        self.stage = Stage::Closed;
        Ok(())
    }
}
