use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

/// Exit code for a batch whose compile gate did not pass.
pub const EXIT_GATE_FAILED: i32 = 1;

/// Exit code for configuration and I/O failures raised before any rewrite.
pub const EXIT_FATAL: i32 = 2;

/// Exit code when files were rewritten but the batch report could not be
/// persisted.
pub const EXIT_REPORT_UNWRITTEN: i32 = 3;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern for rule {rule_id}: {message}")]
    Pattern { rule_id: String, message: String },

    #[error("duplicate mapping for literal {literal:?} in category {category}")]
    DuplicateMapping { category: String, literal: String },

    #[error("rule set not found: {name}")]
    UnknownRuleSet { name: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("required path does not exist: {path}")]
    MissingPath { path: PathBuf },

    #[error("invalid glob {pattern:?}: {message}")]
    Glob { pattern: String, message: String },

    #[error("compile gate did not pass: {status}")]
    GateFailed { status: String },

    #[error("batch was applied but its report could not be written to {out_dir}: {message}")]
    ReportUnwritten { out_dir: PathBuf, message: String },

    #[error("{message}")]
    Exit { code: i32, message: String },
}

impl MigrateError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } => *code,
            Self::GateFailed { .. } => EXIT_GATE_FAILED,
            Self::ReportUnwritten { .. } => EXIT_REPORT_UNWRITTEN,
            _ => EXIT_FATAL,
        }
    }

    #[must_use]
    pub fn exit(code: i32, message: impl Into<String>) -> Self {
        Self::Exit {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn pattern(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}
