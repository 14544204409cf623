//! Native UI controller boundary
//!
//! Best-effort OS-level click/paste primitives used only in autonomous mode.
//! A `false` return means "could not do it"; callers fall back to the
//! in-browser DOM primitive, so a UI controller failure is never fatal by
//! itself. The no-op implementation keeps headless operation free of any
//! OS-level UI dependency.

use async_trait::async_trait;

/// OS-level accessibility primitives
#[async_trait]
pub trait UiController: Send + Sync {
    /// Click a control by its accessible label; best effort
    async fn click_by_label(&self, app: &str, label: &str) -> bool;

    /// Paste text into a labelled field; best effort
    async fn paste_text(&self, app: &str, field_label: &str, text: &str) -> bool;
}

/// Always declines, forcing the DOM fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUi;

#[async_trait]
impl UiController for NoopUi {
    async fn click_by_label(&self, _app: &str, _label: &str) -> bool {
        false
    }

    async fn paste_text(&self, _app: &str, _field_label: &str, _text: &str) -> bool {
        false
    }
}
