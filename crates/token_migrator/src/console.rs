// SPDX-License-Identifier: Apache-2.0
//! Human and machine console output.
//!
//! `fastapi-output` renders human lines (rich or plain, depending on the
//! terminal) and `sqlmodel-console` decides whether the caller wants JSON.
//! In JSON mode every human line is suppressed and a command prints exactly
//! one summary object on stdout.

use fastapi_output::RichOutput;
use serde::Serialize;
use sqlmodel_console::OutputMode as SqlModelOutputMode;

/// Output mode detected once per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleMode {
    /// Human rendering style picked by `fastapi-output`.
    pub renderer: String,
    pub agent: bool,
    pub ci: bool,
    pub tty: bool,
    /// Machine format picked by `sqlmodel-console`; `json` switches the
    /// console to summaries only.
    pub format: String,
}

impl ConsoleMode {
    #[must_use]
    pub fn detect() -> Self {
        let environment = fastapi_output::detect_environment();
        Self {
            renderer: fastapi_output::OutputMode::auto().as_str().to_string(),
            agent: environment.is_agent || SqlModelOutputMode::is_agent_environment(),
            ci: environment.is_ci,
            tty: environment.is_tty,
            format: SqlModelOutputMode::detect().as_str().to_string(),
        }
    }

    /// Plain human output regardless of the environment.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            renderer: "plain".to_string(),
            agent: false,
            ci: false,
            tty: false,
            format: "plain".to_string(),
        }
    }

    #[must_use]
    pub fn wants_json(&self) -> bool {
        self.format == "json"
    }

    /// Print `summary` as one JSON line when JSON output is wanted.
    pub fn print_summary(&self, summary: &serde_json::Value) {
        if self.wants_json() {
            println!("{summary}");
        }
    }
}

/// Human-facing lines, muted in JSON mode.
#[derive(Debug, Clone)]
pub struct Console {
    rich: RichOutput,
    muted: bool,
}

impl Console {
    #[must_use]
    pub fn for_mode(mode: &ConsoleMode) -> Self {
        Self {
            rich: RichOutput::auto(),
            muted: mode.wants_json(),
        }
    }

    pub fn heading(&self, title: &str) {
        if !self.muted {
            self.rich.rule(Some(title));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.muted {
            self.rich.info(message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.muted {
            self.rich.success(message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.muted {
            self.rich.warning(message);
        }
    }

    pub fn error(&self, message: &str) {
        if !self.muted {
            self.rich.error(message);
        }
    }
}
