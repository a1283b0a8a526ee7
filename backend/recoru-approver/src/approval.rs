// src/approval.rs

use std::fmt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{OperatingMode, Timeouts};
use crate::model::WorkItem;
use crate::site;
use crate::target_adapter::{
    click_expecting_dialog, AdapterError, DialogPolicy, TargetAdapter, ViewId,
};

/// The only check results that mean "nothing to fix".
pub const NO_ERROR_SENTINELS: [&str; 2] = ["エラーはありません", "エラーはありません。"];

// --- Outcomes ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub messages: Vec<String>,
    pub has_error: bool,
}

impl CheckOutcome {
    pub fn classify(messages: Vec<String>) -> Self {
        let has_error = messages.iter().any(|m| is_error_message(m));
        Self {
            messages,
            has_error,
        }
    }

    /// Messages other than the sentinel, verbatim.
    pub fn error_messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| is_error_message(m))
            .cloned()
            .collect()
    }
}

fn is_error_message(text: &str) -> bool {
    !text.is_empty() && !NO_ERROR_SENTINELS.contains(&text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Committed,
    VerifiedOnly,
    SkippedDueToError,
    FailedTechnical(String),
}

impl ApprovalOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalOutcome::Committed => "承認完了",
            ApprovalOutcome::VerifiedOnly => "承認可能(未更新)",
            ApprovalOutcome::SkippedDueToError => "エラーのため未承認",
            ApprovalOutcome::FailedTechnical(_) => "処理失敗",
        }
    }
}

/// Step of the per-item sequence, used to label technical failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Open,
    Check,
    Approve,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Check => "check",
            Stage::Approve => "approve",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Outcome of one work item plus the lines the report should carry for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedItem {
    pub outcome: ApprovalOutcome,
    pub details: Vec<String>,
}

impl ProcessedItem {
    fn done(outcome: ApprovalOutcome) -> Self {
        Self {
            outcome,
            details: Vec::new(),
        }
    }

    fn failed(stage: Stage, reason: impl fmt::Display) -> Self {
        Self::technical(format!("{}: {}", stage, reason))
    }

    fn technical(reason: String) -> Self {
        Self {
            details: vec![reason.clone()],
            outcome: ApprovalOutcome::FailedTechnical(reason),
        }
    }
}

fn at(stage: Stage) -> impl Fn(AdapterError) -> (Stage, AdapterError) {
    move |e| (stage, e)
}

// --- Engine ---

/// Runs check → classify → approve → commit/verify for one staff member at a
/// time, each inside its own detail view.
pub struct ApprovalEngine<'a> {
    adapter: &'a dyn TargetAdapter,
    mode: OperatingMode,
    timeouts: Timeouts,
    run_deadline: Option<Instant>,
}

impl<'a> ApprovalEngine<'a> {
    pub fn new(adapter: &'a dyn TargetAdapter, mode: OperatingMode, timeouts: Timeouts) -> Self {
        Self {
            adapter,
            mode,
            timeouts,
            run_deadline: None,
        }
    }

    /// No item is worked on past `deadline`; an item still running then is
    /// cut short like one that overran its own limit.
    pub fn with_run_deadline(mut self, deadline: Instant) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    /// Exactly one outcome per item. A view that was opened is closed exactly
    /// once, whichever way the steps end. Nothing is retried.
    pub async fn process(&self, item: &WorkItem) -> ProcessedItem {
        info!("Processing {} ({})", item.identity, item.detail_location);

        let view = match self.adapter.open_view(&item.detail_location).await {
            Ok(view) => view,
            Err(e) => {
                error!("{}: could not open detail view: {}", item.identity, e);
                return ProcessedItem::failed(Stage::Open, e);
            }
        };

        let item_deadline = Instant::now() + self.timeouts.item();
        let (deadline, reason) = match self.run_deadline {
            Some(run_deadline) if run_deadline < item_deadline => {
                (run_deadline, "run deadline exceeded")
            }
            _ => (item_deadline, "item deadline exceeded"),
        };

        let processed =
            match tokio::time::timeout_at(deadline, self.run_steps(&view, item)).await {
                Ok(processed) => processed,
                Err(_) => {
                    error!("{}: gave up ({})", item.identity, reason);
                    ProcessedItem::technical(reason.to_string())
                }
            };

        if let Err(e) = self.adapter.close_view(&view).await {
            warn!("{}: failed to close detail view: {}", item.identity, e);
        }
        info!("{}: {}", item.identity, processed.outcome.label());
        processed
    }

    async fn run_steps(&self, view: &ViewId, item: &WorkItem) -> ProcessedItem {
        let check = match self.run_check(view).await {
            Ok(check) => check,
            Err(e) => {
                error!("{}: check failed: {}", item.identity, e);
                return ProcessedItem::failed(Stage::Check, e);
            }
        };
        for message in &check.messages {
            debug!("{} check result: {}", item.identity, message);
        }

        self.dismiss_popup(view, item).await;

        if check.has_error {
            let details = check.error_messages();
            warn!(
                "{}: check reported {} problem(s); approval withheld",
                item.identity,
                details.len()
            );
            return ProcessedItem {
                outcome: ApprovalOutcome::SkippedDueToError,
                details,
            };
        }

        match self.approve(view, item).await {
            Ok(processed) => processed,
            Err((stage, e)) => {
                error!("{}: {} failed: {}", item.identity, stage, e);
                ProcessedItem::failed(stage, e)
            }
        }
    }

    async fn run_check(&self, view: &ViewId) -> Result<CheckOutcome, AdapterError> {
        self.adapter
            .wait_for(view, site::CHECK_BUTTON, self.timeouts.element())
            .await?;
        self.adapter.click(view, site::CHECK_BUTTON).await?;
        self.adapter
            .wait_for(view, site::CHECK_POPUP, self.timeouts.element())
            .await?;
        let messages = self.adapter.read_texts(view, site::CHECK_MESSAGES).await?;
        Ok(CheckOutcome::classify(messages))
    }

    async fn dismiss_popup(&self, view: &ViewId, item: &WorkItem) {
        if let Err(e) = self.adapter.press_escape(view).await {
            warn!(
                "{}: could not dismiss the check popup (continuing): {}",
                item.identity, e
            );
        }
    }

    async fn approve(
        &self,
        view: &ViewId,
        item: &WorkItem,
    ) -> Result<ProcessedItem, (Stage, AdapterError)> {
        self.adapter
            .wait_for(view, site::APPROVE_CHECKBOX, self.timeouts.element())
            .await
            .map_err(at(Stage::Approve))?;
        self.adapter
            .click(view, site::APPROVE_CHECKBOX)
            .await
            .map_err(at(Stage::Approve))?;
        debug!("{}: approval box marked", item.identity);

        self.adapter
            .wait_for(view, site::COMMIT_BUTTON, self.timeouts.element())
            .await
            .map_err(at(Stage::Commit))?;

        match self.mode {
            OperatingMode::Apply => {
                // The commit acknowledgment is the page settling after the click.
                let dialog = click_expecting_dialog(
                    self.adapter,
                    view,
                    site::COMMIT_BUTTON,
                    DialogPolicy::Accept,
                    self.timeouts.navigation(),
                )
                .await
                .map_err(at(Stage::Commit))?;
                if let Some(message) = dialog {
                    debug!("{}: accepted confirmation '{}'", item.identity, message);
                }
                Ok(ProcessedItem::done(ApprovalOutcome::Committed))
            }
            OperatingMode::DryRun => {
                let enabled = self
                    .adapter
                    .is_enabled(view, site::COMMIT_BUTTON)
                    .await
                    .map_err(at(Stage::Commit))?;
                if enabled {
                    Ok(ProcessedItem::done(ApprovalOutcome::VerifiedOnly))
                } else {
                    Ok(ProcessedItem::failed(
                        Stage::Commit,
                        "commit control is disabled",
                    ))
                }
            }
        }
    }
}
