// src/target_adapter.rs

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// --- Views, Entries & Dialog Policy ---

/// Handle to one browser view. The main view lives as long as the session;
/// detail views are opened and closed per work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewId(pub String);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One element read out of a list on the page. `href` is the element's own
/// link or the first nested anchor's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UiEntry {
    pub id: Option<String>,
    pub text: String,
    pub href: Option<String>,
}

/// Where an entry's `text` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryText {
    /// The first nested `<span>`, falling back to the whole element. Menu
    /// entries carry their label in a span next to icons and badges.
    SpanLabel,
    /// The element's whole trimmed `textContent`.
    Whole,
}

/// What to do with a native confirm/alert that opens while a policy is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPolicy {
    Accept,
    Reject,
}

// --- Error Type ---
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Timed out after {waited:?} waiting for '{selector}'")]
    Timeout { selector: String, waited: Duration },

    #[error("Element not found: '{0}'")]
    ElementNotFound(String),

    #[error("Page did not settle within {0:?}")]
    SettleTimeout(Duration),

    #[error("Unknown view: {0}")]
    UnknownView(ViewId),

    #[error("WebDriver error '{error}': {message}")]
    WebDriver { error: String, message: String },

    #[error("HTTP request to the browser driver failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Unexpected driver response: {0}")]
    UnexpectedResponse(String),
}

// --- Capability ---

/// Everything the workflow needs from the remote UI. Every call is a
/// suspension point; implementations bound each wait with an explicit deadline.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// The view created together with the session.
    fn main_view(&self) -> ViewId;

    /// Navigate `view` to `url` and wait for it to settle.
    async fn goto(&self, view: &ViewId, url: &str) -> Result<(), AdapterError>;

    async fn current_url(&self, view: &ViewId) -> Result<String, AdapterError>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for(
        &self,
        view: &ViewId,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError>;

    async fn is_present(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError>;

    async fn is_enabled(&self, view: &ViewId, selector: &str) -> Result<bool, AdapterError>;

    /// Click the first element matching `selector`.
    async fn click(&self, view: &ViewId, selector: &str) -> Result<(), AdapterError>;

    /// Replace the value of the first input matching `selector`.
    async fn fill(&self, view: &ViewId, selector: &str, value: &str) -> Result<(), AdapterError>;

    async fn press_escape(&self, view: &ViewId) -> Result<(), AdapterError>;

    /// Trimmed visible text of the first element matching `selector`.
    async fn text(&self, view: &ViewId, selector: &str) -> Result<String, AdapterError>;

    /// Every element matching `selector`, in document order.
    async fn read_entries(
        &self,
        view: &ViewId,
        selector: &str,
        text: EntryText,
    ) -> Result<Vec<UiEntry>, AdapterError>;

    /// Trimmed rendered text (`innerText`, line breaks kept) of every element
    /// matching `selector`, in document order.
    async fn read_texts(
        &self,
        view: &ViewId,
        selector: &str,
    ) -> Result<Vec<String>, AdapterError>;

    /// Click the first element matching `selector` whose trimmed text equals
    /// `text`. Returns false when no element matches.
    async fn click_by_text(
        &self,
        view: &ViewId,
        selector: &str,
        text: &str,
    ) -> Result<bool, AdapterError>;

    /// Wait for pending navigation and background requests to go quiet.
    async fn settle(&self, view: &ViewId, timeout: Duration) -> Result<(), AdapterError>;

    /// Open an isolated view on `url`.
    async fn open_view(&self, url: &str) -> Result<ViewId, AdapterError>;

    async fn close_view(&self, view: &ViewId) -> Result<(), AdapterError>;

    /// Handle the next native dialog on `view` according to `policy` until disarmed.
    async fn arm_dialog(&self, view: &ViewId, policy: DialogPolicy) -> Result<(), AdapterError>;

    /// Stop handling dialogs on `view`; returns the message of any dialog that
    /// was handled while armed.
    async fn disarm_dialog(&self, view: &ViewId) -> Result<Option<String>, AdapterError>;

    /// Tear the whole browser session down.
    async fn shutdown(&self) -> Result<(), AdapterError>;
}

/// Click and wait for the page to settle with a dialog policy armed only for
/// the duration of that action. Returns the message of any dialog handled.
///
/// A rejected dialog usually leaves the page unsettled, so with
/// `DialogPolicy::Reject` a seen dialog wins over a settle failure.
pub async fn click_expecting_dialog(
    adapter: &dyn TargetAdapter,
    view: &ViewId,
    selector: &str,
    policy: DialogPolicy,
    settle_within: Duration,
) -> Result<Option<String>, AdapterError> {
    adapter.arm_dialog(view, policy).await?;
    let action = async {
        adapter.click(view, selector).await?;
        adapter.settle(view, settle_within).await
    }
    .await;
    let seen = adapter.disarm_dialog(view).await?;

    match action {
        Ok(()) => Ok(seen),
        Err(_) if policy == DialogPolicy::Reject && seen.is_some() => Ok(seen),
        Err(e) => Err(e),
    }
}
