// SPDX-License-Identifier: Apache-2.0
//! Batch run records and their on-disk persistence.
//!
//! A [`BatchReport`] is the single source of truth for what one invocation
//! changed. Report files are created with `create_new`; when the computed
//! name is taken a numeric suffix is added, so an earlier report is never
//! reopened for writing.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::gate::GateOutcome;
use crate::runner::BatchWindow;
use crate::util::{ensure_dir, now_utc_iso};

/// Current report schema version.
pub const REPORT_SCHEMA_VERSION: &str = "token-migrator-batch-report-v1";

/// Highest numeric suffix tried before giving up on a unique report name.
const MAX_REPORT_SUFFIX: u32 = 10_000;

// ── Per-file records ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFix {
    pub rule_id: String,
    pub match_count: usize,
}

/// Terminal state of one file in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Skipped,
    Fixed,
    Unchanged,
    Errored,
}

impl FileStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Fixed => "fixed",
            Self::Unchanged => "unchanged",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    pub status: FileStatus,
    pub fixed: bool,
    pub skipped: bool,
    pub fixes: Vec<FileFix>,
    pub error: Option<String>,
    pub original_size: u64,
    pub fixed_size: u64,
    /// Literals matched by a rule but absent from the mapping table.
    #[serde(default)]
    pub unmapped: usize,
}

impl FileResult {
    #[must_use]
    pub fn skipped(path: &str) -> Self {
        Self::with_status(path, FileStatus::Skipped)
    }

    #[must_use]
    pub fn errored(path: &str, original_size: u64, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            original_size,
            fixed_size: original_size,
            ..Self::with_status(path, FileStatus::Errored)
        }
    }

    #[must_use]
    pub fn unchanged(path: &str, size: u64, unmapped: usize) -> Self {
        Self {
            original_size: size,
            fixed_size: size,
            unmapped,
            ..Self::with_status(path, FileStatus::Unchanged)
        }
    }

    #[must_use]
    pub fn fixed(
        path: &str,
        fixes: Vec<FileFix>,
        original_size: u64,
        fixed_size: u64,
        unmapped: usize,
    ) -> Self {
        Self {
            fixes,
            original_size,
            fixed_size,
            unmapped,
            ..Self::with_status(path, FileStatus::Fixed)
        }
    }

    fn with_status(path: &str, status: FileStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            fixed: status == FileStatus::Fixed,
            skipped: status == FileStatus::Skipped,
            fixes: Vec::new(),
            error: None,
            original_size: 0,
            fixed_size: 0,
            unmapped: 0,
        }
    }

    #[must_use]
    pub fn fix_count(&self) -> usize {
        self.fixes.iter().map(|fix| fix.match_count).sum()
    }
}

// ── Gate summary ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl GateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSummary {
    pub status: GateStatus,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub output_tail: String,
}

impl GateSummary {
    #[must_use]
    pub fn skipped(reason: &str) -> Self {
        Self {
            status: GateStatus::Skipped,
            command: None,
            exit_code: None,
            duration_ms: 0,
            output_tail: reason.to_string(),
        }
    }

    #[must_use]
    pub fn from_outcome(command: &str, outcome: &GateOutcome, duration_ms: u64) -> Self {
        let (status, exit_code) = match outcome {
            GateOutcome::Success { .. } => (GateStatus::Passed, Some(0)),
            GateOutcome::Failure { exit_code, .. } => (GateStatus::Failed, *exit_code),
            GateOutcome::Timeout { .. } => (GateStatus::TimedOut, None),
        };
        Self {
            status,
            command: Some(command.to_string()),
            exit_code,
            duration_ms,
            output_tail: outcome.output().to_string(),
        }
    }

    /// A skipped gate does not block the batch.
    #[must_use]
    pub fn allows_progress(&self) -> bool {
        matches!(self.status, GateStatus::Passed | GateStatus::Skipped)
    }
}

// ── Batch report ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub schema_version: String,
    pub rule_set: String,
    pub start_index: usize,
    pub batch_size: usize,
    pub end_index: usize,
    pub total_files: usize,
    pub processed_count: usize,
    pub results: Vec<FileResult>,
    pub total_fixes: usize,
    pub success_count: usize,
    pub fixed_count: usize,
    pub unchanged_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub remaining_count: usize,
    pub compile_success: bool,
    pub gate: GateSummary,
    pub dry_run: bool,
    pub backup_bypassed: bool,
    pub backup_manifest: Option<String>,
    pub timestamp: String,
}

impl BatchReport {
    /// Tally `results` for `window` over a catalog of `total_files` entries.
    #[must_use]
    pub fn new(
        rule_set: &str,
        window: BatchWindow,
        total_files: usize,
        results: Vec<FileResult>,
        gate: GateSummary,
    ) -> Self {
        let count = |status: FileStatus| {
            results
                .iter()
                .filter(|result| result.status == status)
                .count()
        };
        let fixed_count = count(FileStatus::Fixed);
        let unchanged_count = count(FileStatus::Unchanged);
        let error_count = count(FileStatus::Errored);
        let skipped_count = count(FileStatus::Skipped);
        let processed_count = results.len();

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            rule_set: rule_set.to_string(),
            start_index: window.start,
            batch_size: window.size,
            end_index: window.start + processed_count,
            total_files,
            processed_count,
            total_fixes: results.iter().map(FileResult::fix_count).sum(),
            success_count: fixed_count + unchanged_count,
            fixed_count,
            unchanged_count,
            error_count,
            skipped_count,
            remaining_count: remaining_after(total_files, window.start, processed_count),
            compile_success: gate.allows_progress(),
            gate,
            dry_run: false,
            backup_bypassed: false,
            backup_manifest: None,
            results,
            timestamp: now_utc_iso(),
        }
    }

    /// Default file name; embeds the batch window.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}-fix-batch-{}-{}-report.json",
            self.rule_set, self.start_index, self.end_index
        )
    }

    /// Start index for the next invocation, when files remain.
    #[must_use]
    pub fn next_start(&self) -> Option<usize> {
        (self.remaining_count > 0).then_some(self.end_index)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&content)?)
    }
}

/// Files left after a batch, clamped at zero.
#[must_use]
pub fn remaining_after(total_files: usize, start_index: usize, processed_count: usize) -> usize {
    total_files.saturating_sub(start_index.saturating_add(processed_count))
}

// ── Writer ──────────────────────────────────────────────────────────────

/// Persists JSON artifacts under one output directory without ever
/// overwriting an existing file.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    #[must_use]
    pub fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn write(&self, report: &BatchReport) -> Result<PathBuf> {
        self.write_json(&report.file_name(), report)
    }

    /// Serialize `value` to `file_name`, or to `<stem>-<n>.json` when taken.
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        ensure_dir(&self.out_dir)?;
        let content = serde_json::to_string_pretty(value)?;
        let stem = file_name.strip_suffix(".json").unwrap_or(file_name);

        for attempt in 1..=MAX_REPORT_SUFFIX {
            let candidate = if attempt == 1 {
                self.out_dir.join(format!("{stem}.json"))
            } else {
                self.out_dir.join(format!("{stem}-{attempt}.json"))
            };

            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())?;
                    file.write_all(b"\n")?;
                    tracing::debug!(path = %candidate.display(), "report written");
                    return Ok(candidate);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(error) => return Err(error.into()),
            }
        }

        Err(MigrateError::invalid(format!(
            "no free report name for {file_name} under {}",
            self.out_dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{
        BatchReport, FileFix, FileResult, FileStatus, GateStatus, GateSummary, ReportWriter,
        remaining_after,
    };
    use crate::gate::GateOutcome;
    use crate::runner::BatchWindow;

    fn sample_results() -> Vec<FileResult> {
        vec![
            FileResult::fixed(
                "src/a.vue",
                vec![
                    FileFix {
                        rule_id: "font-size".to_string(),
                        match_count: 2,
                    },
                    FileFix {
                        rule_id: "width".to_string(),
                        match_count: 1,
                    },
                ],
                100,
                130,
                0,
            ),
            FileResult::unchanged("src/b.vue", 50, 1),
            FileResult::skipped("src/games/c.vue"),
            FileResult::errored("src/d.vue", 10, "permission denied"),
        ]
    }

    #[test]
    fn report_tallies_results() {
        let report = BatchReport::new(
            "size",
            BatchWindow::new(20, 4),
            30,
            sample_results(),
            GateSummary::skipped("no gate command configured"),
        );

        assert_eq!(report.total_fixes, 3);
        assert_eq!(report.fixed_count, 1);
        assert_eq!(report.unchanged_count, 1);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.processed_count, 4);
        assert_eq!(report.end_index, 24);
        assert_eq!(report.remaining_count, 6);
        assert_eq!(report.next_start(), Some(24));
        assert!(report.compile_success);
        assert_eq!(report.file_name(), "size-fix-batch-20-24-report.json");
    }

    #[test]
    fn failed_gate_marks_compile_failure() {
        let outcome = GateOutcome::Failure {
            exit_code: Some(2),
            output: "error TS2304".to_string(),
        };
        let gate = GateSummary::from_outcome("npm run type-check", &outcome, 1500);
        assert_eq!(gate.status, GateStatus::Failed);
        assert_eq!(gate.exit_code, Some(2));

        let report = BatchReport::new("color", BatchWindow::new(0, 4), 4, sample_results(), gate);
        assert!(!report.compile_success);
        assert_eq!(report.remaining_count, 0);
        assert_eq!(report.next_start(), None);
    }

    #[test]
    fn timeout_is_not_a_pass() {
        let outcome = GateOutcome::Timeout {
            seconds: 5,
            output: String::new(),
        };
        let gate = GateSummary::from_outcome("sleep 10", &outcome, 5000);
        assert_eq!(gate.status, GateStatus::TimedOut);
        assert!(!gate.allows_progress());
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        assert_eq!(remaining_after(10, 0, 4), 6);
        assert_eq!(remaining_after(10, 8, 2), 0);
        assert_eq!(remaining_after(10, 50, 0), 0);
    }

    #[test]
    fn window_past_the_end_reports_empty_batch() {
        let report = BatchReport::new(
            "size",
            BatchWindow::new(40, 10),
            12,
            Vec::new(),
            GateSummary::skipped("empty batch"),
        );
        assert_eq!(report.processed_count, 0);
        assert_eq!(report.end_index, 40);
        assert_eq!(report.remaining_count, 0);
    }

    #[test]
    fn file_result_constructors_set_flags() {
        let skipped = FileResult::skipped("x.vue");
        assert!(skipped.skipped);
        assert!(!skipped.fixed);
        assert_eq!(skipped.status, FileStatus::Skipped);

        let errored = FileResult::errored("y.vue", 12, "boom");
        assert_eq!(errored.error.as_deref(), Some("boom"));
        assert_eq!(errored.fixed_size, 12);
    }

    #[test]
    fn writer_never_overwrites_existing_reports() {
        let temp = tempdir().expect("tempdir");
        let writer = ReportWriter::new(temp.path());
        let report = BatchReport::new(
            "size",
            BatchWindow::new(0, 4),
            4,
            sample_results(),
            GateSummary::skipped("none"),
        );

        let first = writer.write(&report).expect("first write");
        let second = writer.write(&report).expect("second write");

        assert_eq!(
            first.file_name().and_then(|name| name.to_str()),
            Some("size-fix-batch-0-4-report.json")
        );
        assert_eq!(
            second.file_name().and_then(|name| name.to_str()),
            Some("size-fix-batch-0-4-report-2.json")
        );

        let decoded = BatchReport::from_path(&first).expect("decode report");
        assert_eq!(decoded, report);
    }

    #[test]
    fn report_json_uses_snake_case_statuses() {
        let report = BatchReport::new(
            "size",
            BatchWindow::new(0, 4),
            4,
            sample_results(),
            GateSummary::skipped("none"),
        );
        let value = serde_json::to_value(&report).expect("to json");
        assert_eq!(value["results"][0]["status"], "fixed");
        assert_eq!(value["results"][2]["skipped"], true);
        assert_eq!(value["gate"]["status"], "skipped");
        assert_eq!(value["remaining_count"], 0);
    }
}
