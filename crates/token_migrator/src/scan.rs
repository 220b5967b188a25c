// SPDX-License-Identifier: Apache-2.0
//! Read-only issue scan.
//!
//! A scan runs a rule set over candidate files without writing anything and
//! records what a `run` would see. Its `files` list can be fed back to `run`
//! as `--source`, and a scan taken after a migration doubles as the final
//! verification report.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSource, ExclusionPolicy, FileCatalog, OrderedFiles};
use crate::config::{LoadedConfig, ProjectArgs};
use crate::console::{Console, ConsoleMode};
use crate::error::Result;
use crate::report::ReportWriter;
use crate::rules::{RuleSet, RuleStats};
use crate::util::{now_utc_iso, posix_string, resolve_under};

pub const ISSUE_SCHEMA_VERSION: &str = "token-migrator-issue-report-v1";

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Rule set to scan with.
    pub rule_set: String,

    /// Previous issue report to rescan instead of globbing.
    #[arg(long, conflicts_with = "glob")]
    pub source: Option<PathBuf>,

    /// Glob evaluated under --root; defaults to the configured include glob.
    #[arg(long)]
    pub glob: Option<String>,

    #[command(flatten)]
    pub project: ProjectArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssues {
    pub path: String,
    /// Literals that have a token and would be replaced.
    pub mapped: usize,
    /// Literals matched by a rule with no mapping entry.
    pub unmapped: usize,
    pub in_comment: usize,
    pub rules: Vec<RuleStats>,
}

impl FileIssues {
    #[must_use]
    pub fn has_issues(&self) -> bool {
        self.mapped + self.unmapped > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    pub schema_version: String,
    pub rule_set: String,
    pub root: String,
    pub scanned_count: usize,
    /// Sorted files with at least one mapped or unmapped match.
    pub files: Vec<String>,
    pub details: Vec<FileIssues>,
    pub skipped: Vec<String>,
    pub errors: Vec<ScanError>,
    pub total_mapped: usize,
    pub total_unmapped: usize,
    pub unmapped_literals: BTreeMap<String, usize>,
    pub timestamp: String,
}

impl IssueReport {
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-issue-report.json", self.rule_set)
    }

    /// Nothing left that the mapping table could replace.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total_mapped == 0
    }
}

/// Scan every file of `files`. Excluded files are listed as skipped and not
/// read.
#[must_use]
pub fn scan(
    rule_set: &RuleSet,
    files: &OrderedFiles,
    exclusion: &ExclusionPolicy,
    root: &Path,
) -> IssueReport {
    let mut details = Vec::new();
    let mut skipped = Vec::new();
    let mut errors = Vec::new();
    let mut unmapped_literals = BTreeMap::new();

    for rel in files.files() {
        if exclusion.is_excluded(rel) {
            skipped.push(rel.clone());
            continue;
        }
        let text = match fs::read_to_string(resolve_under(root, Path::new(rel))) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(file = %rel, error = %error, "scan read failed");
                errors.push(ScanError {
                    path: rel.clone(),
                    error: error.to_string(),
                });
                continue;
            }
        };

        let rewrite = rule_set.rewrite(&text);
        let rules = rewrite
            .stats
            .into_iter()
            .filter(|stat| stat.matched > 0)
            .collect::<Vec<_>>();
        for stat in &rules {
            for (literal, count) in &stat.unmapped_literals {
                *unmapped_literals.entry(literal.clone()).or_insert(0) += count;
            }
        }

        let issues = FileIssues {
            path: rel.clone(),
            mapped: rules.iter().map(|stat| stat.replaced).sum(),
            unmapped: rules.iter().map(|stat| stat.unmapped).sum(),
            in_comment: rules.iter().map(|stat| stat.in_comment).sum(),
            rules,
        };
        if issues.has_issues() {
            details.push(issues);
        }
    }

    IssueReport {
        schema_version: ISSUE_SCHEMA_VERSION.to_string(),
        rule_set: rule_set.name().to_string(),
        root: posix_string(root),
        scanned_count: files.len() - skipped.len() - errors.len(),
        files: details.iter().map(|issues| issues.path.clone()).collect(),
        total_mapped: details.iter().map(|issues| issues.mapped).sum(),
        total_unmapped: details.iter().map(|issues| issues.unmapped).sum(),
        details,
        skipped,
        errors,
        unmapped_literals,
        timestamp: now_utc_iso(),
    }
}

pub fn run_scan(args: ScanArgs) -> Result<()> {
    let mode = ConsoleMode::detect();
    run_scan_in_mode(args, &mode)
}

fn run_scan_in_mode(args: ScanArgs, mode: &ConsoleMode) -> Result<()> {
    let ui = Console::for_mode(mode);
    let loaded = LoadedConfig::resolve(args.project.config.as_deref())?;
    let rule_set = loaded.rule_set(&args.rule_set)?;
    let root = args.project.resolved_root()?;

    let source = match (&args.source, &args.glob) {
        (Some(path), _) => CatalogSource::IssueReport(path.clone()),
        (None, Some(glob)) => CatalogSource::Glob(glob.clone()),
        (None, None) => CatalogSource::Glob(loaded.config.include_glob.clone()),
    };
    let files = FileCatalog::new(&root)
        .skip_backup_dir(&args.project.resolved_backup_dir(&root))
        .list(&source)?;
    let exclusion = loaded.exclusion(&args.project.exclude);

    let report = scan(rule_set, &files, &exclusion, &root);
    let writer = ReportWriter::new(&args.project.resolved_out_dir(&root));
    let path = writer.write_json(&report.file_name(), &report)?;

    ui.heading(&format!("scan: {}", report.rule_set));
    ui.info(&format!(
        "scanned={} with_issues={} skipped={} errors={}",
        report.scanned_count,
        report.files.len(),
        report.skipped.len(),
        report.errors.len()
    ));
    ui.info(&format!(
        "mapped={} unmapped={}",
        report.total_mapped, report.total_unmapped
    ));
    if report.is_clean() {
        ui.success("no mapped literals remain");
    } else {
        ui.warning(&format!(
            "{} mapped literals remain; feed the report to `run --source`",
            report.total_mapped
        ));
    }
    ui.success(&format!("issue report: {}", path.display()));

    mode.print_summary(&serde_json::json!({
        "command": "scan",
        "status": "ok",
        "rule_set": report.rule_set,
        "report": path.display().to_string(),
        "files_with_issues": report.files.len(),
        "total_mapped": report.total_mapped,
        "total_unmapped": report.total_unmapped,
        "output_mode": mode,
    }));

    Ok(())
}
