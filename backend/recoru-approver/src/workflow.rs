// src/workflow.rs

use chrono::{DateTime, Local};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::approval::ApprovalEngine;
use crate::config::{AppConfig, ConfigError, OperatingMode};
use crate::enumerator::WorkItemPages;
use crate::model::{Period, UnitChoice};
use crate::navigator::{Navigator, NavigatorError, UnitSelection};
use crate::notifier::Notifier;
use crate::report::{OutcomeCounts, ReportAggregator, ReportError, ReportHeader, RunReport};
use crate::session::{AuthenticatedSession, SessionError, SessionManager};
use crate::target_adapter::{AdapterError, TargetAdapter};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Navigation(#[from] NavigatorError),

    #[error("Department '{0}' could not be selected (strictUnitSelection is on)")]
    UnitNotSelected(String),

    #[error("Run exceeded its time limit of {0:?}")]
    RunDeadline(Duration),

    #[error("Could not save the report: {0}")]
    Report(#[from] ReportError),

    #[error("Could not start the browser session: {0}")]
    Browser(#[source] AdapterError),

    #[error("Operator input failed: {0}")]
    Prompt(#[from] io::Error),
}

/// What this run works on, after config and operator input are resolved.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub unit: UnitChoice,
    pub period: Period,
    pub mode: OperatingMode,
    pub filter_identity: Option<String>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub report_path: PathBuf,
    pub counts: OutcomeCounts,
    pub notified: bool,
}

/// How far processing got before it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Complete,
    RunLimitReached,
}

pub struct Workflow<'a> {
    config: &'a AppConfig,
    adapter: Arc<dyn TargetAdapter>,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> Workflow<'a> {
    pub fn new(
        config: &'a AppConfig,
        adapter: Arc<dyn TargetAdapter>,
        notifier: Option<&'a dyn Notifier>,
    ) -> Self {
        Self {
            config,
            adapter,
            notifier,
        }
    }

    /// Sign in, select department and month, process every staff member and
    /// hand the saved report to the notifier. The browser session is torn
    /// down on every path once it has been established.
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary, AppError> {
        info!(
            "Run: unit #{} ({}), {}, {}",
            request.unit.ordinal,
            request.unit.display_name(),
            request.period,
            request.mode.label()
        );

        let session = SessionManager::new(
            self.adapter.clone(),
            self.config.entry_url.clone(),
            self.config.timeouts,
        )
        .establish(&self.config.credentials)
        .await?;

        let header = match self.select_unit(&session, request, Local::now()).await {
            Ok(header) => header,
            Err(e) => {
                session.teardown().await;
                return Err(e);
            }
        };

        let mut aggregator = ReportAggregator::new(header);
        let run_limit = self.config.timeouts.run();
        let deadline = Instant::now() + run_limit;
        let processed = self
            .process(&session, request, &mut aggregator, deadline)
            .await;
        session.teardown().await;

        match processed {
            Ok(Progress::Complete) => self.finish(aggregator.finalize()).await,
            Err(e) => Err(e),
            Ok(Progress::RunLimitReached) => {
                error!("Run limit of {:?} reached; saving the partial report.", run_limit);
                aggregator.note(format!(
                    "実行時間の上限 ({}秒) に達したため中断しました",
                    run_limit.as_secs()
                ));
                self.finish(aggregator.finalize()).await?;
                Err(AppError::RunDeadline(run_limit))
            }
        }
    }

    async fn select_unit(
        &self,
        session: &AuthenticatedSession,
        request: &RunRequest,
        started_at: DateTime<Local>,
    ) -> Result<ReportHeader, AppError> {
        let navigator = Navigator::new(session, self.config.timeouts);
        let selection = navigator.select_unit(&request.unit).await;

        if selection == UnitSelection::NotSelected {
            if self.config.strict_unit_selection {
                return Err(AppError::UnitNotSelected(request.unit.display_name()));
            }
            warn!("Continuing without a confirmed department selection.");
        }

        Ok(ReportHeader {
            unit: selection
                .selected_name()
                .map(str::to_string)
                .unwrap_or_else(|| request.unit.display_name()),
            unit_selected: selection != UnitSelection::NotSelected,
            period: request.period,
            mode: request.mode,
            started_at,
        })
    }

    /// Main-view steps are abandoned at `deadline`; an item already in its
    /// detail view is cut short by the engine so the view is still closed and
    /// the item still gets its report line.
    async fn process(
        &self,
        session: &AuthenticatedSession,
        request: &RunRequest,
        aggregator: &mut ReportAggregator,
        deadline: Instant,
    ) -> Result<Progress, AppError> {
        let timeouts = self.config.timeouts;
        let navigator = Navigator::new(session, timeouts);
        match timeout_at(deadline, navigator.seek_period(request.period)).await {
            Ok(seeked) => seeked?,
            Err(_) => return Ok(Progress::RunLimitReached),
        }

        let engine = ApprovalEngine::new(session.adapter(), request.mode, timeouts)
            .with_run_deadline(deadline);
        let mut pages = WorkItemPages::new(
            session,
            request.period,
            request.filter_identity.clone(),
            timeouts,
            self.config.max_pages,
        );

        loop {
            if Instant::now() >= deadline {
                return Ok(Progress::RunLimitReached);
            }
            let batch = match timeout_at(deadline, pages.next_batch()).await {
                Err(_) => return Ok(Progress::RunLimitReached),
                Ok(Ok(Some(batch))) => batch,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    error!("Reading the staff list failed; stopping here: {}", e);
                    aggregator.note(format!(
                        "{}ページ目以降の一覧を取得できなかったため中断しました: {}",
                        pages.pages_read() + 1,
                        e
                    ));
                    break;
                }
            };
            for item in &batch {
                if Instant::now() >= deadline {
                    return Ok(Progress::RunLimitReached);
                }
                let processed = engine.process(item).await;
                aggregator.append(item, processed);
            }
        }

        info!(
            "Processed {} staff over {} page(s).",
            aggregator.len(),
            pages.pages_read()
        );
        Ok(Progress::Complete)
    }

    async fn finish(&self, report: RunReport) -> Result<RunSummary, AppError> {
        let report_path = report.persist(&self.config.log_directory)?;

        let notified = match self.notifier {
            Some(notifier) => match notifier.deliver(&report, &report_path).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Mailing the report failed: {}", e);
                    false
                }
            },
            None => {
                warn!("Mail is not configured; the report was only saved locally.");
                false
            }
        };

        Ok(RunSummary {
            report_path,
            counts: report.counts(),
            notified,
        })
    }
}
