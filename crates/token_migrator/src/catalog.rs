// SPDX-License-Identifier: Apache-2.0
//! Candidate file enumeration.
//!
//! A catalog listing is always sorted and de-duplicated, with paths stored
//! relative to the project root using `/` separators. Exclusion does not
//! remove entries here: excluded files stay in the listing so the runner can
//! report them as skipped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{MigrateError, Result};
use crate::runner::BatchWindow;
use crate::util::{ensure_exists, posix_string, relative_path, resolve_under};

/// Directory names never descended into while globbing.
pub const DEFAULT_SKIP_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "backups"];

// ── Exclusion ───────────────────────────────────────────────────────────

/// Denylist of path fragments, e.g. `/games/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionPolicy {
    fragments: Vec<String>,
}

impl ExclusionPolicy {
    #[must_use]
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fragments = fragments
            .into_iter()
            .map(|fragment| fragment.as_ref().trim().replace('\\', "/"))
            .filter(|fragment| !fragment.is_empty())
            .collect::<Vec<_>>();
        fragments.sort();
        fragments.dedup();
        Self { fragments }
    }

    /// Whether `path` (relative, `/`-separated) contains any fragment. The
    /// path is tested with a leading `/` so `/games/` also hits top-level
    /// `games/`.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.fragments.is_empty() {
            return false;
        }
        let normalized = format!("/{}", path.replace('\\', "/").trim_start_matches('/'));
        self.fragments
            .iter()
            .any(|fragment| normalized.contains(fragment.as_str()))
    }

    #[must_use]
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }
}

// ── Sources ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// A prior issue-scan report listing files with known violations.
    IssueReport(PathBuf),
    /// A glob evaluated against the project root.
    Glob(String),
}

/// Ordered candidate list for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedFiles {
    files: Vec<String>,
}

impl OrderedFiles {
    #[must_use]
    pub fn new(files: impl IntoIterator<Item = String>) -> Self {
        let mut files = files.into_iter().collect::<Vec<_>>();
        files.sort();
        files.dedup();
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The `[start, start + size)` slice, clamped to the listing.
    #[must_use]
    pub fn window(&self, window: BatchWindow) -> &[String] {
        let start = window.start.min(self.files.len());
        let end = window.end().min(self.files.len());
        &self.files[start..end]
    }

    #[must_use]
    pub fn excluded_count(&self, policy: &ExclusionPolicy) -> usize {
        self.files
            .iter()
            .filter(|path| policy.is_excluded(path))
            .count()
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileCatalog {
    root: PathBuf,
    skip_dirs: Vec<String>,
}

impl FileCatalog {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Also skip directories with this name while globbing.
    #[must_use]
    pub fn skip_dir(mut self, name: &str) -> Self {
        if !self.skip_dirs.iter().any(|existing| existing == name) {
            self.skip_dirs.push(name.to_string());
        }
        self
    }

    /// Skip the backup directory so snapshots are never listed as sources.
    #[must_use]
    pub fn skip_backup_dir(self, backup_dir: &Path) -> Self {
        match backup_dir.file_name().and_then(|name| name.to_str()) {
            Some(name) => self.skip_dir(name),
            None => self,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list(&self, source: &CatalogSource) -> Result<OrderedFiles> {
        let files = match source {
            CatalogSource::IssueReport(path) => self.list_from_report(path)?,
            CatalogSource::Glob(pattern) => self.list_from_glob(pattern)?,
        };
        tracing::debug!(count = files.len(), source = ?source, "catalog listed");
        Ok(files)
    }

    fn list_from_report(&self, path: &Path) -> Result<OrderedFiles> {
        let path = resolve_under(&self.root, path);
        ensure_exists(&path)?;
        let content = fs::read_to_string(&path)?;
        let value = serde_json::from_str::<Value>(&content)?;
        let raw = report_paths(&value).ok_or_else(|| {
            MigrateError::invalid(format!(
                "issue report {} has no recognizable file list",
                path.display()
            ))
        })?;

        let files = raw
            .iter()
            .map(|entry| self.normalize(entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(OrderedFiles::new(files))
    }

    fn list_from_glob(&self, pattern: &str) -> Result<OrderedFiles> {
        ensure_exists(&self.root)?;
        let matcher = compile_globset(&[pattern.to_string()])?;
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self
                        .skip_dirs
                        .iter()
                        .any(|skip| entry.file_name().to_string_lossy() == skip.as_str())
            });

        let mut unreadable = 0usize;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) if error.depth() > 0 => {
                    unreadable += 1;
                    tracing::warn!(
                        path = ?error.path(),
                        error = %error,
                        "skipping unreadable entry while globbing"
                    );
                    continue;
                }
                Err(error) => {
                    return Err(MigrateError::invalid(format!(
                        "walk {}: {error}",
                        self.root.display()
                    )));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if matcher.is_match(rel) {
                files.push(posix_string(rel));
            }
        }
        if unreadable > 0 {
            tracing::warn!(unreadable, pattern, "glob listing is incomplete");
        }

        Ok(OrderedFiles::new(files))
    }

    /// Root-relative form of an issue-report entry. Entries with `..`
    /// components are rejected: two spellings of one file would otherwise
    /// share a backup.
    fn normalize(&self, raw: &str) -> Result<String> {
        let path = Path::new(raw.trim());
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(MigrateError::invalid(format!(
                "issue report entry {raw:?} must not contain `..`"
            )));
        }
        if path.is_absolute() {
            if let Some(rel) = relative_path(&self.root, path) {
                if !rel.starts_with("..") {
                    return Ok(posix_string(&rel));
                }
            }
        }
        Ok(posix_string(path))
    }
}

/// Accepts `[...]`, `{"files": [...]}` or `{"issues": [...]}`, where each
/// item is a path string or an object with a `file` or `path` field.
fn report_paths(value: &Value) -> Option<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("files")
            .or_else(|| map.get("issues"))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(path) => Some(path.clone()),
                Value::Object(map) => map
                    .get("file")
                    .or_else(|| map.get("path"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                _ => None,
            })
            .filter(|path| !path.trim().is_empty())
            .collect(),
    )
}

fn compile_globset(globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob).map_err(|error| MigrateError::Glob {
            pattern: glob.clone(),
            message: error.to_string(),
        })?);
    }
    builder.build().map_err(|error| MigrateError::Glob {
        pattern: globs.join(","),
        message: error.to_string(),
    })
}
