// SPDX-License-Identifier: Apache-2.0
//! Byte-for-byte snapshots of files before they are rewritten.
//!
//! Backups mirror the source tree under the backup root
//! (`backups/src/views/Home.vue`) and are described by a manifest,
//! `backups/backup-info.json`, which always reflects the most recent
//! snapshot. Backup files are never deleted by the vault.
//!
//! # Design Principles
//!
//! 1. **Fail-closed**: a file whose snapshot failed is listed under
//!    `failures` and must not be rewritten in the same run.
//! 2. **Latest bytes restore**: every snapshot copies the file as it is now,
//!    so restoring undoes exactly the batch that followed it.
//! 3. **Pristine archive**: the first copy of each file is also kept under
//!    `backups/.pristine/`. It is only replaced when the vault was built with
//!    `refresh` and is never used by `restore`.
//! 4. **Visible partial restores**: restore attempts every entry and records
//!    each outcome instead of stopping at the first error.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::config::ProjectArgs;
use crate::console::{Console, ConsoleMode};
use crate::error::{EXIT_FATAL, MigrateError, Result};
use crate::report::ReportWriter;
use crate::util::{ensure_exists, now_utc_iso, posix_string, resolve_under, sha256_hex, write_bytes};

/// Manifest file name inside the backup root.
pub const BACKUP_MANIFEST_FILE: &str = "backup-info.json";

pub const BACKUP_SCHEMA_VERSION: &str = "token-migrator-backup-v1";

/// Directory under the backup root holding the first copy of each file.
pub const PRISTINE_DIR: &str = ".pristine";

/// File name of the record written by `restore`.
pub const RESTORE_REPORT_FILE: &str = "restore-report.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Path relative to the source root, `/`-separated.
    pub original: String,
    /// Backup file location.
    pub backup: String,
    /// Size in bytes of the snapshotted content.
    pub size: u64,
    pub sha256: String,
    /// First-seen copy of the file, kept across runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pristine: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFailure {
    pub original: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub schema_version: String,
    pub created_at: String,
    pub source_root: String,
    pub entries: Vec<BackupEntry>,
    #[serde(default)]
    pub failures: Vec<BackupFailure>,
}

impl BackupManifest {
    /// Whether `original` was successfully snapshotted.
    #[must_use]
    pub fn covers(&self, original: &str) -> bool {
        self.entries.iter().any(|entry| entry.original == original)
    }

    #[must_use]
    pub fn failure_for(&self, original: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|failure| failure.original == original)
            .map(|failure| failure.error.as_str())
    }
}

// ── Restore records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub original: String,
    pub restored: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub source_root: String,
    pub attempted: usize,
    pub restored_count: usize,
    pub failed_count: usize,
    pub outcomes: Vec<RestoreOutcome>,
    pub timestamp: String,
}

impl RestoreResult {
    #[must_use]
    pub fn all_restored(&self) -> bool {
        self.failed_count == 0
    }
}

// ── Vault ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackupVault {
    source_root: PathBuf,
    backup_root: PathBuf,
    refresh: bool,
}

impl BackupVault {
    #[must_use]
    pub fn new(source_root: &Path, backup_root: &Path) -> Self {
        Self {
            source_root: source_root.to_path_buf(),
            backup_root: backup_root.to_path_buf(),
            refresh: false,
        }
    }

    /// Replace pristine copies that already exist.
    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    #[must_use]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.backup_root.join(BACKUP_MANIFEST_FILE)
    }

    /// Mirror location of `original` under the backup root. Absolute
    /// originals outside the source root keep their components.
    #[must_use]
    pub fn backup_path_for(&self, original: &str) -> PathBuf {
        mirror_under(&self.backup_root, original)
    }

    #[must_use]
    pub fn pristine_path_for(&self, original: &str) -> PathBuf {
        mirror_under(&self.backup_root.join(PRISTINE_DIR), original)
    }

    /// Copy every file in `files` (relative to the source root) into the
    /// vault and persist the manifest. Per-file failures are recorded, not
    /// raised; only a manifest write failure is an error.
    pub fn snapshot(&self, files: &[String]) -> Result<BackupManifest> {
        let mut entries = Vec::with_capacity(files.len());
        let mut failures = Vec::new();

        for original in files {
            match self.snapshot_one(original) {
                Ok(entry) => {
                    tracing::debug!(
                        file = %original,
                        size = entry.size,
                        "snapshot taken"
                    );
                    entries.push(entry);
                }
                Err(error) => {
                    tracing::warn!(file = %original, error = %error, "snapshot failed");
                    failures.push(BackupFailure {
                        original: original.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let manifest = BackupManifest {
            schema_version: BACKUP_SCHEMA_VERSION.to_string(),
            created_at: now_utc_iso(),
            source_root: posix_string(&self.source_root),
            entries,
            failures,
        };
        save_manifest(&manifest, &self.manifest_path())?;
        tracing::info!(
            entries = manifest.entries.len(),
            failures = manifest.failures.len(),
            manifest = %self.manifest_path().display(),
            "backup manifest written"
        );
        Ok(manifest)
    }

    fn snapshot_one(&self, original: &str) -> Result<BackupEntry> {
        let source = resolve_under(&self.source_root, Path::new(original));
        let backup = self.backup_path_for(original);

        let bytes = fs::read(&source)?;
        write_verified(&backup, &bytes, original)?;

        let pristine = self.pristine_path_for(original);
        if self.refresh || !pristine.is_file() {
            write_verified(&pristine, &bytes, original)?;
        }

        Ok(BackupEntry {
            original: original.to_string(),
            backup: posix_string(&backup),
            size: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            pristine: Some(posix_string(&pristine)),
        })
    }

    /// Restore the vault's current manifest.
    pub fn restore_latest(&self) -> Result<RestoreResult> {
        let manifest = load_manifest(&self.manifest_path())?;
        Ok(restore(&manifest))
    }
}

/// Catalog paths never contain `..`; any that reach here are dropped so the
/// result stays under `base`.
fn mirror_under(base: &Path, original: &str) -> PathBuf {
    let relative = posix_string(Path::new(original));
    let mut path = base.to_path_buf();
    for part in relative.split('/').filter(|part| !part.is_empty() && *part != "..") {
        path.push(part);
    }
    path
}

fn write_verified(path: &Path, bytes: &[u8], original: &str) -> Result<()> {
    write_bytes(path, bytes)?;
    let written = fs::metadata(path)?.len();
    if written != bytes.len() as u64 {
        return Err(MigrateError::invalid(format!(
            "backup of {original} is {written} bytes, expected {}",
            bytes.len()
        )));
    }
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<BackupManifest> {
    ensure_exists(path)?;
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str::<BackupManifest>(&content)?)
}

pub fn save_manifest(manifest: &BackupManifest, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    write_bytes(path, json.as_bytes())
}

/// Write every backup in `manifest` back over its original. Backups whose
/// checksum no longer matches the manifest are refused.
#[must_use]
pub fn restore(manifest: &BackupManifest) -> RestoreResult {
    let source_root = PathBuf::from(&manifest.source_root);
    let outcomes = manifest
        .entries
        .iter()
        .map(|entry| {
            let result = restore_entry(&source_root, entry);
            match &result {
                Ok(()) => tracing::debug!(file = %entry.original, "restored"),
                Err(error) => {
                    tracing::warn!(file = %entry.original, error = %error, "restore failed");
                }
            }
            RestoreOutcome {
                original: entry.original.clone(),
                restored: result.is_ok(),
                error: result.err().map(|error| error.to_string()),
            }
        })
        .collect::<Vec<_>>();

    let restored_count = outcomes.iter().filter(|outcome| outcome.restored).count();
    RestoreResult {
        source_root: manifest.source_root.clone(),
        attempted: outcomes.len(),
        restored_count,
        failed_count: outcomes.len() - restored_count,
        outcomes,
        timestamp: now_utc_iso(),
    }
}

fn restore_entry(source_root: &Path, entry: &BackupEntry) -> Result<()> {
    let bytes = fs::read(&entry.backup)?;
    if !entry.sha256.is_empty() && sha256_hex(&bytes) != entry.sha256 {
        return Err(MigrateError::invalid(format!(
            "backup {} does not match its recorded checksum",
            entry.backup
        )));
    }
    write_bytes(&resolve_under(source_root, Path::new(&entry.original)), &bytes)
}

// ── Command ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Args)]
pub struct RestoreArgs {
    /// Manifest to restore. Defaults to `<backup-dir>/backup-info.json`.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    #[command(flatten)]
    pub project: ProjectArgs,
}

pub fn run_restore(args: RestoreArgs) -> Result<()> {
    let mode = ConsoleMode::detect();
    run_restore_in_mode(args, &mode)
}

fn run_restore_in_mode(args: RestoreArgs, mode: &ConsoleMode) -> Result<()> {
    let ui = Console::for_mode(mode);
    let root = args.project.resolved_root()?;
    let manifest_path = args.manifest.clone().unwrap_or_else(|| {
        args.project
            .resolved_backup_dir(&root)
            .join(BACKUP_MANIFEST_FILE)
    });

    let manifest = load_manifest(&manifest_path)?;
    let result = restore(&manifest);
    let writer = ReportWriter::new(&args.project.resolved_out_dir(&root));
    let path = writer.write_json(RESTORE_REPORT_FILE, &result)?;

    ui.heading("restore");
    ui.info(&format!(
        "attempted={} restored={} failed={}",
        result.attempted, result.restored_count, result.failed_count
    ));
    for outcome in result.outcomes.iter().filter(|outcome| !outcome.restored) {
        ui.error(&format!(
            "{}: {}",
            outcome.original,
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
    ui.success(&format!("restore report: {}", path.display()));

    mode.print_summary(&serde_json::json!({
        "command": "restore",
        "status": if result.all_restored() { "ok" } else { "partial" },
        "manifest": manifest_path.display().to_string(),
        "report": path.display().to_string(),
        "restored": result.restored_count,
        "failed": result.failed_count,
        "output_mode": mode,
    }));

    if result.all_restored() {
        Ok(())
    } else {
        Err(MigrateError::exit(
            EXIT_FATAL,
            format!(
                "{} of {} backups could not be restored; see {}",
                result.failed_count,
                result.attempted,
                path.display()
            ),
        ))
    }
}
