// SPDX-License-Identifier: Apache-2.0
//! Batch orchestration: window, snapshot, rewrite, gate.
//!
//! A run is stateless across invocations. Resumption is driven entirely by
//! the caller passing the next [`BatchWindow`], usually the `end_index` of
//! the previous report.
//!
//! Within one batch the phases are strictly ordered:
//!
//! 1. Read and rewrite every windowed file in memory. Excluded files become
//!    `Skipped`, read failures `Errored`, files with no replacement
//!    `Unchanged`.
//! 2. Snapshot every file about to change. A file without a backup is never
//!    written; it becomes `Errored` instead.
//! 3. Write the rewritten text.
//! 4. Run the compile gate once.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;

use crate::backup::{BackupManifest, BackupVault};
use crate::catalog::{CatalogSource, ExclusionPolicy, FileCatalog, OrderedFiles};
use crate::config::{LoadedConfig, ProjectArgs};
use crate::console::{Console, ConsoleMode};
use crate::error::{MigrateError, Result};
use crate::gate::{CompileGate, GATE_LOG_DIR};
use crate::report::{BatchReport, FileResult, FileStatus, GateStatus, GateSummary, ReportWriter};
use crate::rules::{Rewrite, RuleSet};
use crate::util::{ensure_dir, parse_duration_value, posix_string, resolve_under};

pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Contiguous `[start, start + size)` slice of the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub start: usize,
    pub size: usize,
}

impl BatchWindow {
    #[must_use]
    pub fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }

    /// Exclusive end of the requested window.
    #[must_use]
    pub fn end(self) -> usize {
        self.start.saturating_add(self.size)
    }

    /// Window following a batch that processed `processed` files.
    #[must_use]
    pub fn next(self, processed: usize) -> Self {
        Self::new(self.start.saturating_add(processed), self.size)
    }
}

/// A file whose rewrite is ready but not yet written.
struct PendingWrite {
    slot: usize,
    rel: String,
    path: PathBuf,
    rewrite: Rewrite,
    original_size: u64,
}

pub struct BatchRunner<'a> {
    rule_set: &'a RuleSet,
    exclusion: &'a ExclusionPolicy,
    root: PathBuf,
    vault: Option<&'a BackupVault>,
    gate: Option<&'a CompileGate>,
    dry_run: bool,
}

impl<'a> BatchRunner<'a> {
    /// A runner with no backup vault and no gate. Use the builder methods to
    /// attach them.
    #[must_use]
    pub fn new(rule_set: &'a RuleSet, exclusion: &'a ExclusionPolicy, root: &Path) -> Self {
        Self {
            rule_set,
            exclusion,
            root: root.to_path_buf(),
            vault: None,
            gate: None,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_vault(mut self, vault: &'a BackupVault) -> Self {
        self.vault = Some(vault);
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: &'a CompileGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Compute results without snapshotting, writing or gating.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process `window` of `files` and return the batch record. File-local
    /// failures are captured in the results; this never aborts mid-batch.
    #[must_use]
    pub fn run(&self, files: &OrderedFiles, window: BatchWindow) -> BatchReport {
        let slice = files.window(window);
        tracing::info!(
            rule_set = %self.rule_set.name(),
            start = window.start,
            size = window.size,
            files = slice.len(),
            total = files.len(),
            dry_run = self.dry_run,
            "batch start"
        );

        let mut slots: Vec<Option<FileResult>> = vec![None; slice.len()];
        let mut pending = Vec::new();

        for (slot, rel) in slice.iter().enumerate() {
            match self.prepare(slot, rel) {
                Ok(write) => pending.push(write),
                Err(result) => slots[slot] = Some(result),
            }
        }

        let manifest = if self.dry_run {
            for write in pending.drain(..) {
                slots[write.slot] = Some(fixed_result(&write));
            }
            None
        } else {
            let manifest = self.snapshot(&mut pending, &mut slots);
            self.commit_all(pending, &mut slots);
            manifest
        };

        let results = slots.into_iter().flatten().collect::<Vec<_>>();
        let end = window.start + results.len();
        let gate = self.verify(window.start, end);

        let mut report = BatchReport::new(self.rule_set.name(), window, files.len(), results, gate);
        report.dry_run = self.dry_run;
        report.backup_bypassed = !self.dry_run && self.vault.is_none();
        report.backup_manifest = manifest
            .as_ref()
            .and(self.vault)
            .map(|vault| posix_string(&vault.manifest_path()));

        tracing::info!(
            fixed = report.fixed_count,
            unchanged = report.unchanged_count,
            errored = report.error_count,
            skipped = report.skipped_count,
            remaining = report.remaining_count,
            compile_success = report.compile_success,
            "batch complete"
        );
        report
    }

    /// Phase 1 for one file: either a pending write or a terminal result.
    fn prepare(&self, slot: usize, rel: &str) -> std::result::Result<PendingWrite, FileResult> {
        if self.exclusion.is_excluded(rel) {
            tracing::debug!(file = %rel, "skipped by exclusion policy");
            return Err(FileResult::skipped(rel));
        }

        let path = resolve_under(&self.root, Path::new(rel));
        let original_size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(file = %rel, error = %error, "read failed");
                return Err(FileResult::errored(
                    rel,
                    original_size,
                    format!("read failed: {error}"),
                ));
            }
        };

        let rewrite = self.rule_set.rewrite(&text);
        if !rewrite.changed() {
            tracing::debug!(file = %rel, unmapped = rewrite.total_unmapped(), "unchanged");
            return Err(FileResult::unchanged(
                rel,
                original_size,
                rewrite.total_unmapped(),
            ));
        }

        Ok(PendingWrite {
            slot,
            rel: rel.to_string(),
            path,
            rewrite,
            original_size,
        })
    }

    /// Phase 2. Drops every pending write that has no backup and records it
    /// as errored.
    fn snapshot(
        &self,
        pending: &mut Vec<PendingWrite>,
        slots: &mut [Option<FileResult>],
    ) -> Option<BackupManifest> {
        let vault = self.vault?;
        if pending.is_empty() {
            return None;
        }

        let files = pending
            .iter()
            .map(|write| write.rel.clone())
            .collect::<Vec<_>>();

        match vault.snapshot(&files) {
            Ok(manifest) => {
                pending.retain(|write| {
                    if manifest.covers(&write.rel) {
                        return true;
                    }
                    let reason = manifest
                        .failure_for(&write.rel)
                        .unwrap_or("no backup entry");
                    slots[write.slot] = Some(FileResult::errored(
                        &write.rel,
                        write.original_size,
                        format!("backup failed: {reason}"),
                    ));
                    false
                });
                Some(manifest)
            }
            Err(error) => {
                tracing::error!(error = %error, "backup manifest could not be written");
                for write in pending.drain(..) {
                    slots[write.slot] = Some(FileResult::errored(
                        &write.rel,
                        write.original_size,
                        format!("backup failed: {error}"),
                    ));
                }
                None
            }
        }
    }

    /// Phase 3. A failed write only affects its own file.
    fn commit_all(&self, pending: Vec<PendingWrite>, slots: &mut [Option<FileResult>]) {
        for write in pending {
            slots[write.slot] = Some(self.commit(&write));
        }
    }

    fn commit(&self, write: &PendingWrite) -> FileResult {
        match fs::write(&write.path, write.rewrite.text.as_bytes()) {
            Ok(()) => {
                tracing::debug!(
                    file = %write.rel,
                    replaced = write.rewrite.total_replaced(),
                    "rewritten"
                );
                fixed_result(write)
            }
            Err(error) => {
                tracing::warn!(file = %write.rel, error = %error, "write failed");
                FileResult::errored(
                    &write.rel,
                    write.original_size,
                    format!("write failed: {error}"),
                )
            }
        }
    }

    /// Phase 4.
    fn verify(&self, start: usize, end: usize) -> GateSummary {
        if self.dry_run {
            return GateSummary::skipped("dry run");
        }
        let Some(gate) = self.gate else {
            return GateSummary::skipped("no gate command configured");
        };
        let stem = format!("{}-batch-{start}-{end}", self.rule_set.name());
        let (_, summary) = gate.clone().with_log_stem(&stem).verify_summary();
        summary
    }
}

// ── Command ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Rule set to apply, e.g. `size` or `color`.
    pub rule_set: String,

    /// Index of the first file of this batch in the candidate list.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Issue report listing the candidate files.
    #[arg(long, conflicts_with = "glob")]
    pub source: Option<PathBuf>,

    /// Glob evaluated under --root; defaults to the configured include glob.
    #[arg(long)]
    pub glob: Option<String>,

    #[command(flatten)]
    pub project: ProjectArgs,

    /// Gate command, overriding the configured one.
    #[arg(long = "gate-command")]
    pub gate_command: Option<String>,

    /// Gate timeout such as `300`, `90s`, `5m` or `1500ms`.
    #[arg(long = "gate-timeout")]
    pub gate_timeout: Option<String>,

    #[arg(long = "skip-gate")]
    pub skip_gate: bool,

    /// Report what would change without writing anything.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Rewrite files without snapshotting them first.
    #[arg(long = "no-backup")]
    pub no_backup: bool,

    /// Replace the pristine first-snapshot copies with the current bytes.
    #[arg(long = "refresh-backups")]
    pub refresh_backups: bool,
}

pub fn run_migration(args: RunArgs) -> Result<()> {
    let mode = ConsoleMode::detect();
    run_migration_in_mode(args, &mode)
}

fn run_migration_in_mode(args: RunArgs, mode: &ConsoleMode) -> Result<()> {
    let ui = Console::for_mode(mode);
    if args.batch_size == 0 {
        return Err(MigrateError::invalid("--batch-size must be greater than 0"));
    }

    let loaded = LoadedConfig::resolve(args.project.config.as_deref())?;
    let rule_set = loaded.rule_set(&args.rule_set)?;
    let root = args.project.resolved_root()?;
    let out_dir = args.project.resolved_out_dir(&root);
    let backup_dir = args.project.resolved_backup_dir(&root);
    prepare_out_dir(&out_dir)?;

    let source = match (&args.source, &args.glob) {
        (Some(path), _) => CatalogSource::IssueReport(path.clone()),
        (None, Some(glob)) => CatalogSource::Glob(glob.clone()),
        (None, None) => CatalogSource::Glob(loaded.config.include_glob.clone()),
    };
    let files = FileCatalog::new(&root)
        .skip_backup_dir(&backup_dir)
        .list(&source)?;
    let exclusion = loaded.exclusion(&args.project.exclude);
    let window = BatchWindow::new(args.start, args.batch_size);

    if args.start >= files.len() {
        ui.warning(&format!(
            "start index {} is past the end of {} candidate files",
            args.start,
            files.len()
        ));
    }

    let vault = (!args.dry_run && !args.no_backup)
        .then(|| BackupVault::new(&root, &backup_dir).with_refresh(args.refresh_backups));
    let gate = resolve_gate(&args, &loaded, &root, &out_dir)?;

    let mut runner = BatchRunner::new(rule_set, &exclusion, &root).dry_run(args.dry_run);
    if let Some(vault) = &vault {
        runner = runner.with_vault(vault);
    }
    if let Some(gate) = &gate {
        runner = runner.with_gate(gate);
    }

    let report = runner.run(&files, window);
    let written = ReportWriter::new(&out_dir).write(&report);
    let path = written.as_ref().ok().map(PathBuf::as_path);
    print_batch_summary(&ui, &report, path);

    let status = match (&written, report.compile_success) {
        (Err(_), _) => "report_unwritten",
        (Ok(_), true) => "ok",
        (Ok(_), false) => "gate_failed",
    };
    mode.print_summary(&serde_json::json!({
        "command": "run",
        "status": status,
        "rule_set": report.rule_set,
        "report": path.map(|path| path.display().to_string()),
        "processed": report.processed_count,
        "fixed": report.fixed_count,
        "unchanged": report.unchanged_count,
        "errored": report.error_count,
        "skipped": report.skipped_count,
        "total_fixes": report.total_fixes,
        "remaining": report.remaining_count,
        "next_start": report.next_start(),
        "compile_success": report.compile_success,
        "gate": report.gate.status,
        "dry_run": report.dry_run,
        "output_mode": mode,
    }));

    if let Err(error) = written {
        tracing::error!(out_dir = %out_dir.display(), error = %error, "batch report not written");
        return Err(MigrateError::ReportUnwritten {
            out_dir,
            message: error.to_string(),
        });
    }
    if !report.compile_success {
        return Err(MigrateError::GateFailed {
            status: report.gate.status.as_str().to_string(),
        });
    }
    Ok(())
}

/// Fail before any file is touched when reports cannot land in `out_dir`.
fn prepare_out_dir(out_dir: &Path) -> Result<()> {
    if out_dir.exists() && !out_dir.is_dir() {
        return Err(MigrateError::invalid(format!(
            "output directory {} is not a directory",
            out_dir.display()
        )));
    }
    ensure_dir(out_dir)
}

fn resolve_gate(
    args: &RunArgs,
    loaded: &LoadedConfig,
    root: &Path,
    out_dir: &Path,
) -> Result<Option<CompileGate>> {
    if args.skip_gate || args.dry_run {
        return Ok(None);
    }
    let command = args
        .gate_command
        .clone()
        .or_else(|| loaded.config.gate.command.clone())
        .filter(|command| !command.trim().is_empty());
    let Some(command) = command else {
        return Ok(None);
    };

    let timeout = match &args.gate_timeout {
        Some(raw) => parse_duration_value(raw)?,
        None => Duration::from_secs(loaded.config.gate.timeout_seconds),
    };
    if timeout.is_zero() {
        return Err(MigrateError::invalid("--gate-timeout must be greater than 0"));
    }

    Ok(Some(CompileGate::new(
        &command,
        root,
        timeout,
        &out_dir.join(GATE_LOG_DIR),
    )))
}

fn print_batch_summary(ui: &Console, report: &BatchReport, path: Option<&Path>) {
    ui.heading(&format!(
        "{} batch {}..{} of {}",
        report.rule_set, report.start_index, report.end_index, report.total_files
    ));
    ui.info(&format!(
        "processed={} fixed={} unchanged={} errored={} skipped={}",
        report.processed_count,
        report.fixed_count,
        report.unchanged_count,
        report.error_count,
        report.skipped_count
    ));
    ui.info(&format!(
        "total_fixes={} remaining={}",
        report.total_fixes, report.remaining_count
    ));
    for result in report
        .results
        .iter()
        .filter(|result| result.status == FileStatus::Errored)
    {
        ui.warning(&format!(
            "{}: {}",
            result.path,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if report.dry_run {
        ui.info("dry run: no files were written");
    } else if report.backup_bypassed {
        ui.warning("backups bypassed: rewritten files have no snapshot");
    }

    match report.gate.status {
        GateStatus::Passed => ui.success("compile gate passed"),
        GateStatus::Skipped => ui.info(&format!("compile gate skipped: {}", report.gate.output_tail)),
        GateStatus::Failed | GateStatus::TimedOut => ui.error(&format!(
            "compile gate {}: fix the code or run `restore` before the next batch",
            report.gate.status.as_str()
        )),
    }

    match path {
        Some(path) => ui.success(&format!("batch report: {}", path.display())),
        None => ui.error("batch report could not be written; the results above are the only record"),
    }
    if report.compile_success {
        if let Some(next) = report.next_start() {
            ui.info(&format!("next batch: --start {next}"));
        }
    }
}

fn fixed_result(write: &PendingWrite) -> FileResult {
    FileResult::fixed(
        &write.rel,
        write.rewrite.fixes(),
        write.original_size,
        write.rewrite.text.len() as u64,
        write.rewrite.total_unmapped(),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::{BatchRunner, BatchWindow, DEFAULT_BATCH_SIZE, RunArgs, run_migration_in_mode};
    use crate::backup::BackupVault;
    use crate::catalog::{ExclusionPolicy, OrderedFiles};
    use crate::config::ProjectArgs;
    use crate::console::ConsoleMode;
    use crate::error::MigrateError;
    use crate::mapping::{Category, MappingEntry, MappingTable};
    use crate::report::{FileStatus, GateStatus};
    use crate::rules::{RuleSet, RuleSpec};

    fn rule_set() -> RuleSet {
        let mappings = MappingTable::from_entries(vec![
            MappingEntry::new("14px", Category::FontSize, "var(--text-base)"),
            MappingEntry::new("16px", Category::Spacing, "var(--spacing-md)"),
        ])
        .expect("mappings");
        let specs = vec![
            RuleSpec {
                id: "font-size".to_string(),
                category: Category::FontSize,
                pattern: r#"(?:^|[\s;{"'])font-size\s*:\s*(?P<value>\d+(?:\.\d+)?px)"#.to_string(),
                description: String::new(),
                split_values: false,
            },
            RuleSpec {
                id: "margin".to_string(),
                category: Category::Spacing,
                pattern: r#"(?:^|[\s;{"'])margin\s*:\s*(?P<value>\d+(?:\.\d+)?px)"#.to_string(),
                description: String::new(),
                split_values: false,
            },
        ];
        RuleSet::compile("size", &specs, Arc::new(mappings)).expect("rule set")
    }

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let temp = tempdir().expect("tempdir");
        for (rel, body) in files {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, body).expect("write");
        }
        temp
    }

    #[test]
    fn window_helpers() {
        let window = BatchWindow::new(20, 10);
        assert_eq!(window.end(), 30);
        assert_eq!(window.next(7), BatchWindow::new(27, 10));
        assert_eq!(BatchWindow::new(usize::MAX, 5).end(), usize::MAX);
    }

    #[test]
    fn batch_classifies_each_file() {
        let temp = project(&[
            ("src/a.vue", ".a { font-size: 14px; }"),
            ("src/b.vue", ".b { margin: 999px; }"),
            ("src/games/c.vue", ".c { font-size: 14px; }"),
        ]);
        let files = OrderedFiles::new(vec![
            "src/a.vue".to_string(),
            "src/b.vue".to_string(),
            "src/games/c.vue".to_string(),
            "src/missing.vue".to_string(),
        ]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::new(["/games/"]);
        let vault = BackupVault::new(temp.path(), &temp.path().join("backups"));

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .with_vault(&vault)
            .run(&files, BatchWindow::new(0, 10));

        let statuses = report
            .results
            .iter()
            .map(|result| (result.path.as_str(), result.status))
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                ("src/a.vue", FileStatus::Fixed),
                ("src/b.vue", FileStatus::Unchanged),
                ("src/games/c.vue", FileStatus::Skipped),
                ("src/missing.vue", FileStatus::Errored),
            ]
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("src/a.vue")).expect("a"),
            ".a { font-size: var(--text-base); }"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("src/games/c.vue")).expect("c"),
            ".c { font-size: 14px; }"
        );
        assert_eq!(report.total_fixes, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.results[1].unmapped, 1);
        assert!(report.compile_success);
        assert_eq!(report.gate.status, GateStatus::Skipped);
        assert!(!report.backup_bypassed);
        assert!(report.backup_manifest.is_some());

        let backup = temp.path().join("backups/src/a.vue");
        assert_eq!(
            fs::read_to_string(backup).expect("backup"),
            ".a { font-size: 14px; }"
        );
        assert!(!temp.path().join("backups/src/b.vue").exists());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let temp = project(&[("a.vue", "p{font-size: 14px}")]);
        let files = OrderedFiles::new(vec!["a.vue".to_string()]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();
        let vault = BackupVault::new(temp.path(), &temp.path().join("backups"));

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .with_vault(&vault)
            .dry_run(true)
            .run(&files, BatchWindow::new(0, 5));

        assert!(report.dry_run);
        assert_eq!(report.fixed_count, 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("a.vue")).expect("a"),
            "p{font-size: 14px}"
        );
        assert!(!temp.path().join("backups").exists());
        assert_eq!(report.gate.status, GateStatus::Skipped);
    }

    #[test]
    fn windowing_slices_and_counts_remaining() {
        let bodies = (0..5)
            .map(|i| (format!("f{i}.vue"), "p { margin: 16px; }".to_string()))
            .collect::<Vec<_>>();
        let refs = bodies
            .iter()
            .map(|(path, body)| (path.as_str(), body.as_str()))
            .collect::<Vec<_>>();
        let temp = project(&refs);
        let files = OrderedFiles::new(bodies.iter().map(|(path, _)| path.clone()));
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .run(&files, BatchWindow::new(1, 2));

        assert_eq!(report.processed_count, 2);
        assert_eq!(report.end_index, 3);
        assert_eq!(report.remaining_count, 2);
        assert!(report.backup_bypassed);
        assert_eq!(
            fs::read_to_string(temp.path().join("f0.vue")).expect("f0"),
            "p { margin: 16px; }"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("f1.vue")).expect("f1"),
            "p { margin: var(--spacing-md); }"
        );
    }

    #[test]
    fn backup_failure_fails_closed() {
        let temp = project(&[("a.vue", "p{font-size: 14px}")]);
        // A regular file where the backup directory should be.
        fs::write(temp.path().join("backups"), "not a dir").expect("blocker");
        let files = OrderedFiles::new(vec!["a.vue".to_string()]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();
        let vault = BackupVault::new(temp.path(), &temp.path().join("backups"));

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .with_vault(&vault)
            .run(&files, BatchWindow::new(0, 5));

        assert_eq!(report.error_count, 1);
        assert_eq!(report.fixed_count, 0);
        assert!(
            report.results[0]
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("backup failed"))
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("a.vue")).expect("a"),
            "p{font-size: 14px}"
        );
    }

    #[test]
    fn one_backup_failure_only_blocks_that_file() {
        let temp = project(&[
            ("a.vue", "p{font-size: 14px}"),
            ("b.vue", "p{font-size: 14px}"),
            ("c.vue", "p{margin: 16px}"),
        ]);
        // A directory where b.vue's backup copy has to go.
        fs::create_dir_all(temp.path().join("backups/b.vue")).expect("blocker");
        let files = OrderedFiles::new(vec![
            "a.vue".to_string(),
            "b.vue".to_string(),
            "c.vue".to_string(),
        ]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();
        let vault = BackupVault::new(temp.path(), &temp.path().join("backups"));

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .with_vault(&vault)
            .run(&files, BatchWindow::new(0, 5));

        let statuses = report
            .results
            .iter()
            .map(|result| result.status)
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![FileStatus::Fixed, FileStatus::Errored, FileStatus::Fixed]
        );
        assert!(
            report.results[1]
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("backup failed"))
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("b.vue")).expect("b"),
            "p{font-size: 14px}"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("a.vue")).expect("a"),
            "p{font-size: var(--text-base)}"
        );

        let manifest = crate::backup::load_manifest(&vault.manifest_path()).expect("manifest");
        assert!(manifest.covers("a.vue"));
        assert!(manifest.covers("c.vue"));
        assert!(manifest.failure_for("b.vue").is_some());
        assert_eq!(
            report.backup_manifest.as_deref(),
            Some(crate::util::posix_string(&vault.manifest_path()).as_str())
        );
    }

    #[test]
    fn write_failure_is_errored_and_other_files_still_commit() {
        let temp = project(&[
            ("a.vue", "p{font-size: 14px}"),
            ("b.vue", "p{font-size: 14px}"),
            ("c.vue", "p{font-size: 14px}"),
        ]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();
        let runner = BatchRunner::new(&rules, &exclusion, temp.path());

        let pending = ["a.vue", "b.vue", "c.vue"]
            .iter()
            .enumerate()
            .map(|(slot, rel)| match runner.prepare(slot, rel) {
                Ok(write) => write,
                Err(result) => panic!("expected a pending write, got {result:?}"),
            })
            .collect::<Vec<_>>();

        // b.vue turns into a directory after it was read; no user may write it.
        let blocked = temp.path().join("b.vue");
        fs::remove_file(&blocked).expect("remove");
        fs::create_dir(&blocked).expect("mkdir");

        let mut slots = vec![None; 3];
        runner.commit_all(pending, &mut slots);

        let results = slots.into_iter().flatten().collect::<Vec<_>>();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, FileStatus::Fixed);
        assert_eq!(results[1].status, FileStatus::Errored);
        assert!(
            results[1]
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("write failed"))
        );
        assert_eq!(results[2].status, FileStatus::Fixed);
        assert!(blocked.is_dir());
        assert_eq!(
            fs::read_to_string(temp.path().join("c.vue")).expect("c"),
            "p{font-size: var(--text-base)}"
        );
    }

    fn run_args(root: &std::path::Path) -> RunArgs {
        RunArgs {
            rule_set: "size".to_string(),
            start: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            source: None,
            glob: None,
            project: ProjectArgs {
                root: root.to_path_buf(),
                out_dir: None,
                config: None,
                backup_dir: None,
                exclude: Vec::new(),
            },
            gate_command: None,
            gate_timeout: None,
            skip_gate: true,
            dry_run: false,
            no_backup: false,
            refresh_backups: false,
        }
    }

    #[test]
    fn unusable_out_dir_fails_before_any_rewrite() {
        let temp = project(&[("src/a.vue", ".a { font-size: 14px; }")]);
        let blocker = temp.path().join("reports");
        fs::write(&blocker, "not a dir").expect("blocker");

        let mut args = run_args(temp.path());
        args.project.out_dir = Some(blocker);
        let error = run_migration_in_mode(args, &ConsoleMode::plain()).expect_err("out dir");

        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            fs::read_to_string(temp.path().join("src/a.vue")).expect("a"),
            ".a { font-size: 14px; }"
        );
    }

    #[cfg(unix)]
    #[test]
    fn report_lost_after_rewrite_has_distinct_exit_code() {
        let temp = project(&[("src/a.vue", ".a { font-size: 14px; }")]);
        let mut args = run_args(temp.path());
        args.project.out_dir = Some(temp.path().join("reports"));
        // The gate runs after the rewrite and leaves no room for the report.
        args.skip_gate = false;
        args.gate_command = Some("rm -rf reports && touch reports".to_string());

        let error = run_migration_in_mode(args, &ConsoleMode::plain()).expect_err("lost report");

        assert!(matches!(error, MigrateError::ReportUnwritten { .. }));
        assert_eq!(error.exit_code(), 3);
        assert_eq!(
            fs::read_to_string(temp.path().join("src/a.vue")).expect("a"),
            ".a { font-size: var(--text-base); }"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_gate_marks_report() {
        use std::time::Duration;

        use crate::gate::CompileGate;

        let temp = project(&[("a.vue", "p{font-size: 14px}")]);
        let files = OrderedFiles::new(vec!["a.vue".to_string()]);
        let rules = rule_set();
        let exclusion = ExclusionPolicy::default();
        let gate = CompileGate::new(
            "exit 1",
            temp.path(),
            Duration::from_secs(10),
            &temp.path().join("gate-logs"),
        );

        let report = BatchRunner::new(&rules, &exclusion, temp.path())
            .with_gate(&gate)
            .run(&files, BatchWindow::new(0, 5));

        assert!(!report.compile_success);
        assert_eq!(report.gate.status, GateStatus::Failed);
        assert_eq!(report.fixed_count, 1);
        assert!(temp.path().join("gate-logs/size-batch-0-1.stdout.log").is_file());
    }
}
