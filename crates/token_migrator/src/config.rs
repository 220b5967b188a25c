// SPDX-License-Identifier: Apache-2.0
//! Static migration configuration: mapping tables, rule sets, exclusions and
//! the gate command.
//!
//! Configuration is plain JSON so a run is reproducible from its inputs. A
//! loaded configuration is validated eagerly: every mapping entry and every
//! rule of every rule set must be valid, otherwise nothing runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::catalog::ExclusionPolicy;
use crate::console::ConsoleMode;
use crate::error::{MigrateError, Result};
use crate::mapping::{MappingEntry, MappingTable};
use crate::rules::{RuleSet, RuleSpec};
use crate::util::ensure_exists;

pub const CONFIG_SCHEMA_VERSION: &str = "token-migrator-config-v1";

pub const DEFAULT_INCLUDE_GLOB: &str = "**/*.{vue,css,scss,less}";

pub const DEFAULT_GATE_TIMEOUT_SECONDS: u64 = 300;

/// Backup directory name under the project root.
pub const DEFAULT_BACKUP_DIR: &str = "backups";

const BUILTIN_CONFIG: &str = include_str!("../rulesets/builtin.json");

/// Location flags shared by every command that touches a project.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Project root; catalog paths are relative to it.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Where reports and gate logs go. Defaults to the project root.
    #[arg(long = "out-dir")]
    pub out_dir: Option<PathBuf>,

    /// JSON configuration file. The built-in configuration is used otherwise.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backup vault directory. Defaults to `<root>/backups`.
    #[arg(long = "backup-dir")]
    pub backup_dir: Option<PathBuf>,

    /// Extra path fragment to skip, on top of the configured denylist.
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
}

impl ProjectArgs {
    /// Absolute project root. Fails when the root does not exist.
    pub fn resolved_root(&self) -> Result<PathBuf> {
        ensure_exists(&self.root)?;
        Ok(fs::canonicalize(&self.root)?)
    }

    #[must_use]
    pub fn resolved_out_dir(&self, root: &Path) -> PathBuf {
        self.out_dir
            .clone()
            .unwrap_or_else(|| root.to_path_buf())
    }

    #[must_use]
    pub fn resolved_backup_dir(&self, root: &Path) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_BACKUP_DIR))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Shell command run after each batch. `None` disables the gate.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_gate_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_seconds: DEFAULT_GATE_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub mappings: Vec<MappingEntry>,
    pub rule_sets: BTreeMap<String, Vec<RuleSpec>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_include_glob")]
    pub include_glob: String,
    #[serde(default)]
    pub gate: GateConfig,
}

fn default_schema_version() -> String {
    CONFIG_SCHEMA_VERSION.to_string()
}

fn default_include_glob() -> String {
    DEFAULT_INCLUDE_GLOB.to_string()
}

fn default_gate_timeout() -> u64 {
    DEFAULT_GATE_TIMEOUT_SECONDS
}

/// A validated configuration with its mapping table built once.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MigrationConfig,
    mappings: Arc<MappingTable>,
    rule_sets: BTreeMap<String, RuleSet>,
}

impl MigrationConfig {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        ensure_exists(path)?;
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CONFIG)
    }

    /// Build and check everything, failing on the first problem.
    pub fn validate(self) -> Result<LoadedConfig> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(MigrateError::invalid(format!(
                "unsupported config schema_version {:?} (expected {CONFIG_SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        if self.rule_sets.is_empty() {
            return Err(MigrateError::invalid("config defines no rule sets"));
        }
        if self.gate.timeout_seconds == 0 {
            return Err(MigrateError::invalid("gate timeout_seconds must be > 0"));
        }

        let mappings = Arc::new(MappingTable::from_entries(self.mappings.iter().cloned())?);
        let mut rule_sets = BTreeMap::new();
        for (name, specs) in &self.rule_sets {
            let rule_set = RuleSet::compile(name, specs, Arc::clone(&mappings))?;
            rule_sets.insert(name.clone(), rule_set);
        }

        tracing::debug!(
            mappings = mappings.len(),
            rule_sets = rule_sets.len(),
            "configuration validated"
        );
        Ok(LoadedConfig {
            config: self,
            mappings,
            rule_sets,
        })
    }
}

impl LoadedConfig {
    /// Load `path` when given, the built-in configuration otherwise.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => MigrationConfig::load(path)?.validate(),
            None => MigrationConfig::builtin()?.validate(),
        }
    }

    #[must_use]
    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    pub fn rule_set(&self, name: &str) -> Result<&RuleSet> {
        self.rule_sets
            .get(name)
            .ok_or_else(|| MigrateError::UnknownRuleSet {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn rule_set_names(&self) -> Vec<&str> {
        self.rule_sets.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn rule_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.rule_sets.values()
    }

    /// Configured denylist plus `extra` fragments from the command line.
    #[must_use]
    pub fn exclusion(&self, extra: &[String]) -> ExclusionPolicy {
        ExclusionPolicy::new(self.config.exclude.iter().chain(extra))
    }
}

#[derive(Debug, Clone, Args)]
pub struct ListRulesArgs {
    /// JSON configuration file. The built-in configuration is used otherwise.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run_list_rules(args: ListRulesArgs) -> Result<()> {
    let mode = ConsoleMode::detect();
    let loaded = LoadedConfig::resolve(args.config.as_deref())?;

    if mode.wants_json() {
        let rule_sets = loaded
            .rule_sets()
            .map(|rule_set| {
                serde_json::json!({
                    "name": rule_set.name(),
                    "rules": rule_set
                        .rules()
                        .iter()
                        .map(|rule| serde_json::json!({
                            "id": rule.id,
                            "category": rule.category,
                            "description": rule.description,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>();
        mode.print_summary(&serde_json::json!({
            "command": "list-rules",
            "rule_sets": rule_sets,
            "mapping_counts": loaded.mappings().counts_by_category(),
            "exclude": loaded.config.exclude,
        }));
        return Ok(());
    }

    print!("{}", render_rule_listing(&loaded));
    Ok(())
}

fn render_rule_listing(loaded: &LoadedConfig) -> String {
    let mut out = String::new();
    for rule_set in loaded.rule_sets() {
        out.push_str(rule_set.name());
        out.push('\n');
        for rule in rule_set.rules() {
            out.push_str(&format!("  {:<16} [{}] {}\n", rule.id, rule.category, rule.description));
        }
    }
    out.push_str("mappings\n");
    for (category, count) in loaded.mappings().counts_by_category() {
        out.push_str(&format!("  {category:<16} {count}\n"));
    }
    if !loaded.config.exclude.is_empty() {
        out.push_str(&format!("exclude: {}\n", loaded.config.exclude.join(", ")));
    }
    out
}
