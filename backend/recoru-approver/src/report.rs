// src/report.rs

use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::approval::{ApprovalOutcome, ProcessedItem};
use crate::config::OperatingMode;
use crate::model::{Period, WorkItem};

const UNSELECTED_MARKER: &str = "(部署未選択)";
const RULE: &str = "----------------------------------------";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> ReportError {
    ReportError::Io {
        source,
        context: context.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    pub unit: String,
    /// False when the department menu could not be driven and the run went
    /// ahead against whatever department the page showed.
    pub unit_selected: bool,
    pub period: Period,
    pub mode: OperatingMode,
    pub started_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub identity: String,
    pub outcome: ApprovalOutcome,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub committed: usize,
    pub verified_only: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.committed + self.verified_only + self.skipped + self.failed
    }
}

/// Append-only collector; lines keep processing order.
#[derive(Debug)]
pub struct ReportAggregator {
    header: ReportHeader,
    lines: Vec<ReportLine>,
    notes: Vec<String>,
}

impl ReportAggregator {
    pub fn new(header: ReportHeader) -> Self {
        Self {
            header,
            lines: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn append(&mut self, item: &WorkItem, processed: ProcessedItem) {
        self.lines.push(ReportLine {
            identity: item.identity.clone(),
            outcome: processed.outcome,
            details: processed.details,
        });
    }

    /// Run-level remark printed after the item list, e.g. why enumeration
    /// stopped early.
    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn finalize(self) -> RunReport {
        RunReport {
            header: self.header,
            lines: self.lines,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub header: ReportHeader,
    pub lines: Vec<ReportLine>,
    pub notes: Vec<String>,
}

impl RunReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for line in &self.lines {
            match line.outcome {
                ApprovalOutcome::Committed => counts.committed += 1,
                ApprovalOutcome::VerifiedOnly => counts.verified_only += 1,
                ApprovalOutcome::SkippedDueToError => counts.skipped += 1,
                ApprovalOutcome::FailedTechnical(_) => counts.failed += 1,
            }
        }
        counts
    }

    fn unit_heading(&self) -> String {
        if self.header.unit_selected {
            self.header.unit.clone()
        } else {
            format!("{} {}", self.header.unit, UNSELECTED_MARKER)
        }
    }

    /// `<unit> <year>年<month>月-社員チェック結果<timestamp>.log`, with path
    /// separators in the unit name replaced.
    pub fn file_name(&self) -> String {
        let unit: String = self
            .header
            .unit
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!(
            "{} {}-社員チェック結果{}.log",
            unit,
            self.header.period,
            self.header.started_at.format("%Y%m%d%H%M%S")
        )
    }

    pub fn mail_subject(&self) -> String {
        format!("{} {} 社員チェック結果", self.header.unit, self.header.period)
    }

    fn counts_block(&self) -> String {
        let counts = self.counts();
        format!(
            "{}: {}\n{}: {}\n{}: {}\n{}: {}\n合計: {}\n",
            ApprovalOutcome::Committed.label(),
            counts.committed,
            ApprovalOutcome::VerifiedOnly.label(),
            counts.verified_only,
            ApprovalOutcome::SkippedDueToError.label(),
            counts.skipped,
            ApprovalOutcome::FailedTechnical(String::new()).label(),
            counts.failed,
            counts.total()
        )
    }

    /// Plain-text mail body: what ran plus the counts. The full report travels
    /// as the attachment.
    pub fn summary(&self) -> String {
        let mut body = format!(
            "{} {} の社員チェック結果です。({})\n\n",
            self.unit_heading(),
            self.header.period,
            self.header.mode.label()
        );
        body.push_str(&self.counts_block());
        for note in &self.notes {
            body.push_str(&format!("\n備考: {}", note));
        }
        body
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "部署: {}", self.unit_heading());
        let _ = writeln!(out, "対象: {}", self.header.period);
        let _ = writeln!(out, "モード: {}", self.header.mode.label());
        let _ = writeln!(
            out,
            "開始: {}",
            self.header.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "{}", RULE);

        for line in &self.lines {
            let _ = writeln!(out, "[{}] {}", line.outcome.label(), line.identity);
            for detail_line in line.details.iter().flat_map(|d| d.lines()) {
                let _ = writeln!(out, "    {}", detail_line);
            }
        }
        if self.lines.is_empty() {
            let _ = writeln!(out, "(対象者なし)");
        }

        let _ = writeln!(out, "{}", RULE);
        for note in &self.notes {
            let _ = writeln!(out, "備考: {}", note);
        }
        out.push_str(&self.counts_block());
        out
    }

    /// Write the rendered report under `directory`, creating it if needed.
    pub fn persist(&self, directory: &Path) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(directory).map_err(|e| {
            io_context(
                e,
                format!("Failed to create log directory: {:?}", directory),
            )
        })?;

        let path = directory.join(self.file_name());
        let mut file = File::create(&path)
            .map_err(|e| io_context(e, format!("Failed to create report file: {:?}", path)))?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| io_context(e, format!("Failed to write report file: {:?}", path)))?;

        info!("Report written to {:?}", path);
        Ok(path)
    }
}
