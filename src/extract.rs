//! Credential extraction
//!
//! Ordered fallback strategies are tried until one yields a string matching
//! the credential grammar: structured DOM read, in-page copy + clipboard,
//! regex scan over the rendered text, and an optional OCR pass. Grammar
//! validation is a separate pure function so extraction failures and
//! validation failures stay distinguishable in results and logs.

use crate::browser::BrowserDriver;
use crate::errors::{OrchestrateError, OrchestrateResult};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fixed textual shape of a valid credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrammar {
    /// Required prefix (e.g. "ops_")
    pub prefix: String,

    /// Minimum total length including the prefix
    pub min_len: usize,
}

impl Default for TokenGrammar {
    fn default() -> Self {
        Self {
            prefix: "ops_".to_string(),
            min_len: 100,
        }
    }
}

impl TokenGrammar {
    pub fn new(prefix: impl Into<String>, min_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            min_len,
        }
    }

    /// Regex matching a grammar-valid credential inside larger text
    pub fn scan_regex(&self) -> Regex {
        let body_min = self.min_len.saturating_sub(self.prefix.len());
        let pattern = format!(
            "{}[A-Za-z0-9_-]{{{},}}",
            regex::escape(&self.prefix),
            body_min
        );
        // pattern is built from validated parts; compilation cannot fail
        Regex::new(&pattern).expect("credential scan pattern")
    }
}

/// Detailed outcome of grammar validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCheck {
    pub is_valid: bool,
    pub prefix_ok: bool,
    pub length_ok: bool,
    pub charset_ok: bool,
    pub errors: Vec<String>,
}

/// Validate a candidate against the credential grammar
///
/// Pure function: prefix, minimum length, restricted character set.
pub fn validate_token_format(token: &str, grammar: &TokenGrammar) -> TokenCheck {
    let mut errors = Vec::new();

    let prefix_ok = token.starts_with(&grammar.prefix);
    if !prefix_ok {
        errors.push(format!("token must start with '{}'", grammar.prefix));
    }

    let length_ok = token.len() >= grammar.min_len;
    if !length_ok {
        errors.push(format!(
            "token too short: {} < {}",
            token.len(),
            grammar.min_len
        ));
    }

    let body = token.strip_prefix(&grammar.prefix).unwrap_or(token);
    let charset_ok = !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !charset_ok {
        errors.push("token contains characters outside [A-Za-z0-9_-]".to_string());
    }

    TokenCheck {
        is_valid: prefix_ok && length_ok && charset_ok,
        prefix_ok,
        length_ok,
        charset_ok,
        errors,
    }
}

/// Optional OCR backend for the last-resort screenshot strategy
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> OrchestrateResult<String>;
}

/// Element identifiers the structured DOM strategy probes, most specific
/// first
const DOM_CANDIDATES: &[&str] = &["code-token", "token-display", "pre-token"];

/// Copy-control identifiers the clipboard strategy probes
const COPY_CANDIDATES: &[&str] = &["button-copy-token", "button-copy"];

/// Multi-strategy credential extractor
pub struct TokenExtractor {
    grammar: TokenGrammar,
    ocr: Option<Box<dyn OcrBackend>>,
}

impl TokenExtractor {
    pub fn new(grammar: TokenGrammar) -> Self {
        Self { grammar, ocr: None }
    }

    /// Attach an OCR backend for the screenshot fallback
    pub fn with_ocr(mut self, ocr: Box<dyn OcrBackend>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn grammar(&self) -> &TokenGrammar {
        &self.grammar
    }

    /// Try the strategies strictly in order; the first grammar-valid hit
    /// wins. Fails with [`OrchestrateError::Extraction`] when none match —
    /// that failure is structural, the page will not change on retry.
    pub async fn extract(&self, driver: &mut dyn BrowserDriver) -> OrchestrateResult<String> {
        let mut attempted = Vec::new();

        attempted.push("dom");
        if let Some(token) = self.via_dom(driver).await? {
            info!(strategy = "dom", "credential extracted");
            return Ok(token);
        }

        attempted.push("clipboard");
        if let Some(token) = self.via_clipboard(driver).await? {
            info!(strategy = "clipboard", "credential extracted");
            return Ok(token);
        }

        attempted.push("page-text");
        if let Some(token) = self.via_page_text(driver).await? {
            info!(strategy = "page-text", "credential extracted");
            return Ok(token);
        }

        attempted.push("ocr");
        if let Some(token) = self.via_ocr(driver).await? {
            info!(strategy = "ocr", "credential extracted");
            return Ok(token);
        }

        Err(OrchestrateError::Extraction(format!(
            "no strategy yielded a grammar-valid credential (tried: {})",
            attempted.join(", ")
        )))
    }

    /// Strategy 1: structured read from a code-like element
    async fn via_dom(&self, driver: &mut dyn BrowserDriver) -> OrchestrateResult<Option<String>> {
        for candidate in DOM_CANDIDATES {
            if let Some(text) = driver.element_text(candidate).await? {
                let trimmed = text.trim();
                if validate_token_format(trimmed, &self.grammar).is_valid {
                    return Ok(Some(trimmed.to_string()));
                }
                debug!(element = candidate, "element text failed grammar check");
            }
        }
        Ok(None)
    }

    /// Strategy 2: trigger the in-page copy control, then read the clipboard
    async fn via_clipboard(
        &self,
        driver: &mut dyn BrowserDriver,
    ) -> OrchestrateResult<Option<String>> {
        for candidate in COPY_CANDIDATES {
            match driver.click(candidate).await {
                Ok(report) if report.success => {}
                // a missing copy button just means this strategy is out
                _ => continue,
            }
            if let Some(clip) = driver.read_clipboard().await? {
                let trimmed = clip.trim();
                if validate_token_format(trimmed, &self.grammar).is_valid {
                    return Ok(Some(trimmed.to_string()));
                }
                debug!("clipboard contents failed grammar check");
            }
        }
        Ok(None)
    }

    /// Strategy 3: regex scan over the full rendered page text
    async fn via_page_text(
        &self,
        driver: &mut dyn BrowserDriver,
    ) -> OrchestrateResult<Option<String>> {
        let text = driver.page_text().await?;
        let regex = self.grammar.scan_regex();

        // tokens are sometimes wrapped across lines; scan a whitespace-free
        // copy first, then the raw text
        let collapsed: String = text.split_whitespace().collect();
        for haystack in [collapsed.as_str(), text.as_str()] {
            if let Some(found) = regex.find(haystack) {
                let candidate = found.as_str();
                if validate_token_format(candidate, &self.grammar).is_valid {
                    return Ok(Some(candidate.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Strategy 4: best-effort OCR of the credential region; a no-op unless
    /// a backend was attached
    async fn via_ocr(&self, driver: &mut dyn BrowserDriver) -> OrchestrateResult<Option<String>> {
        let Some(ocr) = self.ocr.as_ref() else {
            debug!("no OCR backend attached, skipping strategy");
            return Ok(None);
        };
        let Some(image) = driver.screenshot().await? else {
            return Ok(None);
        };
        match ocr.recognize(&image).await {
            Ok(text) => {
                let regex = self.grammar.scan_regex();
                Ok(regex.find(&text).map(|m| m.as_str().to_string()))
            }
            Err(err) => {
                warn!(%err, "OCR strategy failed, continuing without it");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ScriptedDriver;
    use crate::types::StepReport;
    use crate::decision::{Intent, PageState};

    fn valid_token() -> String {
        format!("ops_{}", "a1B2-c3_D".repeat(15))
    }

    #[test]
    fn grammar_validation_reports_each_failure() {
        let grammar = TokenGrammar::default();

        let good = validate_token_format(&valid_token(), &grammar);
        assert!(good.is_valid);
        assert!(good.errors.is_empty());

        let wrong_prefix = validate_token_format(&format!("tok_{}", "a".repeat(120)), &grammar);
        assert!(!wrong_prefix.is_valid);
        assert!(!wrong_prefix.prefix_ok);
        assert!(wrong_prefix.length_ok);

        let too_short = validate_token_format("ops_abc123", &grammar);
        assert!(!too_short.is_valid);
        assert!(!too_short.length_ok);

        let bad_chars = validate_token_format(&format!("ops_{}!", "a".repeat(120)), &grammar);
        assert!(!bad_chars.is_valid);
        assert!(!bad_chars.charset_ok);
    }

    #[test]
    fn scan_regex_finds_embedded_tokens() {
        let grammar = TokenGrammar::default();
        let token = valid_token();
        let text = format!("Save this token now:\n  {token}\nIt will not be shown again.");
        let found = grammar.scan_regex().find(&text).unwrap();
        assert_eq!(found.as_str(), token);
    }

    #[tokio::test]
    async fn dom_strategy_wins_on_the_token_page() {
        let mut driver = ScriptedDriver::new(valid_token());
        driver.open(true).await.unwrap();
        driver.navigate("https://vault.example.com/wizard").await.unwrap();
        driver.fill_form("ci-bot", &[]).await.unwrap();
        driver.step_wizard(5).await.unwrap();

        let extractor = TokenExtractor::new(TokenGrammar::default());
        let token = extractor.extract(&mut driver).await.unwrap();
        assert_eq!(token, valid_token());
    }

    /// Driver that hides the token from the DOM and clipboard so only the
    /// page-text scan can find it
    struct TextOnlyDriver {
        inner: ScriptedDriver,
    }

    #[async_trait]
    impl BrowserDriver for TextOnlyDriver {
        async fn open(&mut self, headless: bool) -> OrchestrateResult<()> {
            self.inner.open(headless).await
        }
        async fn navigate(&mut self, url: &str) -> OrchestrateResult<StepReport> {
            self.inner.navigate(url).await
        }
        async fn fill_form(
            &mut self,
            account_name: &str,
            vaults: &[String],
        ) -> OrchestrateResult<StepReport> {
            self.inner.fill_form(account_name, vaults).await
        }
        async fn step_wizard(&mut self, max_steps: u32) -> OrchestrateResult<StepReport> {
            self.inner.step_wizard(max_steps).await
        }
        async fn snapshot(&self, intent: Intent) -> OrchestrateResult<PageState> {
            self.inner.snapshot(intent).await
        }
        async fn click(&mut self, _target: &str) -> OrchestrateResult<StepReport> {
            Err(OrchestrateError::not_found("element", "no copy button"))
        }
        async fn fill(&mut self, target: &str, value: &str) -> OrchestrateResult<StepReport> {
            self.inner.fill(target, value).await
        }
        async fn element_text(&self, _target: &str) -> OrchestrateResult<Option<String>> {
            Ok(None)
        }
        async fn page_text(&self) -> OrchestrateResult<String> {
            self.inner.page_text().await
        }
        async fn read_clipboard(&self) -> OrchestrateResult<Option<String>> {
            Ok(None)
        }
        async fn screenshot(&self) -> OrchestrateResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn close(&mut self) -> OrchestrateResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn page_text_scan_is_the_third_fallback() {
        let mut inner = ScriptedDriver::new(valid_token());
        inner.open(true).await.unwrap();
        inner.navigate("https://vault.example.com/wizard").await.unwrap();
        inner.fill_form("ci-bot", &[]).await.unwrap();
        inner.step_wizard(5).await.unwrap();

        let mut driver = TextOnlyDriver { inner };
        let extractor = TokenExtractor::new(TokenGrammar::default());
        let token = extractor.extract(&mut driver).await.unwrap();
        assert_eq!(token, valid_token());
    }

    #[tokio::test]
    async fn all_strategies_missing_raises_extraction_error() {
        // wizard never advanced, so no page shows the token
        let mut driver = ScriptedDriver::new(valid_token());
        driver.open(true).await.unwrap();
        driver.navigate("https://vault.example.com/wizard").await.unwrap();

        let extractor = TokenExtractor::new(TokenGrammar::default());
        let err = extractor.extract(&mut driver).await.unwrap_err();
        match err {
            OrchestrateError::Extraction(message) => {
                assert!(message.contains("dom"));
                assert!(message.contains("ocr"));
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }
}
