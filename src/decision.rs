//! Decision engine for autonomous wizard navigation
//!
//! Chooses the next action from a page snapshot, judges step results, and
//! classifies failures into retry strategies. Every decision is logged with
//! its reasoning so fully autonomous runs remain auditable.

use crate::errors::OrchestrateError;
use crate::retry::RetryStrategy;
use crate::types::StepReport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Supported action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Navigate,
    Extract,
    Retry,
    Wait,
}

/// The next automation action, with reasoning for the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,

    /// Element identifier or URL the action targets
    pub target: Option<String>,

    /// Payload for fill actions
    pub value: Option<String>,

    /// Free-text reasoning, logged with the decision
    pub reason: String,

    /// Confidence in the choice, 0.0..=1.0
    pub confidence: f64,
}

impl Action {
    pub fn retry(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: ActionKind::Retry,
            target: None,
            value: None,
            reason: reason.into(),
            confidence,
        }
    }

    fn click(target: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: ActionKind::Click,
            target: Some(target.into()),
            value: None,
            reason: reason.into(),
            confidence,
        }
    }

    fn fill(
        target: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            kind: ActionKind::Fill,
            target: Some(target.into()),
            value: Some(value.into()),
            reason: reason.into(),
            confidence,
        }
    }

    fn navigate(url: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: ActionKind::Navigate,
            target: Some(url.into()),
            value: None,
            reason: reason.into(),
            confidence,
        }
    }

    fn extract(target: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: ActionKind::Extract,
            target: Some(target.into()),
            value: None,
            reason: reason.into(),
            confidence,
        }
    }
}

/// What the orchestrator wants from the current page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Intent {
    /// Reach a target URL
    Navigate { url: String },

    /// Fill named form fields
    Fill { fields: BTreeMap<String, String> },

    /// Advance the wizard by clicking a continue-like control
    Advance { labels: Vec<String> },

    /// Locate the credential display
    Extract,
}

impl Intent {
    /// Default continue-control labels, in priority order
    pub fn advance_defaults() -> Self {
        Self::Advance {
            labels: ["continue", "next", "submit", "save", "create", "finish", "done"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Structured snapshot of a page, the decision engine's sole input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,

    /// Rendered text of the page (lowercased free text is fine)
    pub dom_snapshot: String,

    /// Identifiers of currently visible interactive elements
    pub visible_elements: BTreeSet<String>,

    pub intent: Intent,
}

/// Chooses actions and classifies failures; stateless and cheap to share
#[derive(Debug, Default, Clone)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide the next action for a page snapshot
    ///
    /// Never fails: when no candidate element exists the engine degrades to
    /// a low-confidence `Retry` action, the expected signal that the page
    /// has not finished loading.
    pub fn decide_next_action(&self, page: &PageState) -> Action {
        let action = self.select_action(page);
        info!(
            action = ?action.kind,
            target = action.target.as_deref().unwrap_or("-"),
            reason = %action.reason,
            confidence = action.confidence,
            url = %page.url,
            "decision"
        );
        action
    }

    fn select_action(&self, page: &PageState) -> Action {
        if page.visible_elements.is_empty() {
            return Action::retry("no_action_candidates", 0.1);
        }

        let dom = normalize(&page.dom_snapshot);
        if dom.contains("captcha") {
            return Action::retry("captcha_detected", 0.2);
        }
        if dom.contains("error") || dom.contains("failed") || dom.contains("try again") {
            return Action::retry("page_error_detected", 0.4);
        }

        match &page.intent {
            Intent::Navigate { url } => {
                if url_matches(&page.url, url) {
                    Action::retry("no_action_candidates", 0.1)
                } else {
                    Action::navigate(url.clone(), "target_url_mismatch", 0.9)
                }
            }
            Intent::Fill { fields } => self.select_fill(page, fields),
            Intent::Advance { labels } => self.select_click(page, labels),
            Intent::Extract => self.select_extract(page),
        }
    }

    fn select_fill(&self, page: &PageState, fields: &BTreeMap<String, String>) -> Action {
        let mut best: Option<(&String, &String, &String, f64)> = None;
        for element in &page.visible_elements {
            for (field, value) in fields {
                let score = score_match(element, field);
                if score <= 0.0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    // prefer the most specific (highest score, then longest id)
                    Some((prev_el, _, _, prev)) => {
                        score > prev || (score == prev && element.len() > prev_el.len())
                    }
                };
                if better {
                    best = Some((element, field, value, score));
                }
            }
        }

        match best {
            Some((element, field, value, score)) => Action::fill(
                element.clone(),
                value.clone(),
                format!("fill_field:{field}"),
                (0.4 + score * 0.6).min(1.0),
            ),
            None => Action::retry("no_action_candidates", 0.1),
        }
    }

    fn select_click(&self, page: &PageState, labels: &[String]) -> Action {
        let mut best: Option<(&String, &String, f64)> = None;
        for element in &page.visible_elements {
            let text = normalize(element);
            for (rank, label) in labels.iter().enumerate() {
                if text.contains(&normalize(label)) {
                    let score = 1.0 - rank as f64 / labels.len().max(1) as f64;
                    if best.map_or(true, |(_, _, prev)| score > prev) {
                        best = Some((element, label, score));
                    }
                }
            }
        }

        match best {
            Some((element, label, score)) => Action::click(
                element.clone(),
                format!("click_candidate:{label}"),
                (0.3 + score * 0.7).min(1.0),
            ),
            None => Action::retry("no_action_candidates", 0.1),
        }
    }

    fn select_extract(&self, page: &PageState) -> Action {
        let markers = ["token", "code", "secret", "credential"];
        let candidate = page.visible_elements.iter().find(|el| {
            let text = normalize(el);
            markers.iter().any(|m| text.contains(m))
        });

        match candidate {
            Some(element) => Action::extract(element.clone(), "credential_display_located", 0.8),
            None => Action::retry("no_action_candidates", 0.1),
        }
    }

    /// Pure predicate on a step result
    pub fn evaluate_result(&self, report: &StepReport) -> bool {
        report.success
    }

    /// Classify a failure into the closed strategy set
    ///
    /// Pure: identical error variant and message always yield the same
    /// strategy name and budget.
    pub fn retry_strategy(&self, error: &OrchestrateError) -> RetryStrategy {
        let strategy = match error {
            OrchestrateError::Timeout { .. } => RetryStrategy::timeout(),
            OrchestrateError::Network { .. } => RetryStrategy::transient_network(),
            OrchestrateError::NotFound { .. } => RetryStrategy::not_found(),
            OrchestrateError::Validation(_)
            | OrchestrateError::NotAuthenticated { .. }
            | OrchestrateError::Extraction(_)
            | OrchestrateError::Serde(_)
            | OrchestrateError::Cancelled(_)
            | OrchestrateError::Cleanup(_)
            | OrchestrateError::RetriesExhausted { .. } => RetryStrategy::validation(),
            OrchestrateError::Resource { .. } => RetryStrategy::not_found(),
            OrchestrateError::Io(_) => RetryStrategy::unknown(),
            OrchestrateError::Internal(message) => {
                let text = message.to_lowercase();
                if text.contains("timeout") || text.contains("timed out") {
                    RetryStrategy::timeout()
                } else if text.contains("connection") || text.contains("network") {
                    RetryStrategy::transient_network()
                } else {
                    RetryStrategy::unknown()
                }
            }
        };

        debug!(
            strategy = strategy.name,
            retryable = strategy.retryable,
            max_attempts = strategy.max_attempts,
            reason = strategy.reason,
            %error,
            "classified failure"
        );
        strategy
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn url_matches(current: &str, target: &str) -> bool {
    if current.is_empty() || target.is_empty() {
        return false;
    }
    current == target || current.starts_with(target) || current.contains(target)
}

fn score_match(element: &str, field: &str) -> f64 {
    let element = normalize(element);
    let field = normalize(field);
    if element.is_empty() || field.is_empty() {
        return 0.0;
    }
    if element == field {
        return 1.0;
    }
    if element.contains(&field) {
        return 0.8;
    }
    if field.contains(&element) {
        return 0.6;
    }
    if field.split(' ').any(|token| element.contains(token)) {
        return 0.4;
    }
    0.0
}
