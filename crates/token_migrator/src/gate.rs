// SPDX-License-Identifier: Apache-2.0
//! External build/typecheck gate run after each batch.
//!
//! The gate is one blocking call with an explicit timeout. Output goes to log
//! files rather than pipes, so a chatty build cannot stall on a full buffer
//! and the logs outlive the run. The command runs in its own process group;
//! a timeout terminates the whole group and counts as a failure.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::Result;
use crate::report::GateSummary;
use crate::util::{ensure_dir, tail_string};

/// Bytes of combined output kept in the gate result.
pub const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// Log directory name under the output directory.
pub const GATE_LOG_DIR: &str = "gate-logs";

/// Time between TERM and KILL when a timed out gate is torn down.
const TERMINATE_GRACE: Duration = Duration::from_millis(250);

/// Typed result of one gate invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Success { output: String },
    Failure { exit_code: Option<i32>, output: String },
    Timeout { seconds: u64, output: String },
}

impl GateOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success { output } | Self::Failure { output, .. } | Self::Timeout { output, .. } => {
                output.as_str()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileGate {
    command: String,
    workdir: PathBuf,
    timeout: Duration,
    log_dir: PathBuf,
    log_stem: String,
}

impl CompileGate {
    #[must_use]
    pub fn new(command: &str, workdir: &Path, timeout: Duration, log_dir: &Path) -> Self {
        Self {
            command: command.to_string(),
            workdir: workdir.to_path_buf(),
            timeout,
            log_dir: log_dir.to_path_buf(),
            log_stem: "gate".to_string(),
        }
    }

    /// Name the log files `<stem>.stdout.log` / `<stem>.stderr.log`.
    #[must_use]
    pub fn with_log_stem(mut self, stem: &str) -> Self {
        self.log_stem = stem.to_string();
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn log_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.log_dir.join(format!("{}.stdout.log", self.log_stem)),
            self.log_dir.join(format!("{}.stderr.log", self.log_stem)),
        )
    }

    /// Run the gate. A command that cannot be started is a failure, never a
    /// pass.
    #[must_use]
    pub fn verify(&self) -> GateOutcome {
        tracing::info!(command = %self.command, timeout_secs = self.timeout.as_secs(), "compile gate start");
        let outcome = match self.run() {
            Ok(outcome) => outcome,
            Err(error) => GateOutcome::Failure {
                exit_code: None,
                output: format!("failed to run gate command `{}`: {error}", self.command),
            },
        };
        match &outcome {
            GateOutcome::Success { .. } => tracing::info!("compile gate passed"),
            GateOutcome::Failure { exit_code, .. } => {
                tracing::warn!(exit_code = ?exit_code, "compile gate failed");
            }
            GateOutcome::Timeout { seconds, .. } => {
                tracing::warn!(seconds, "compile gate timed out");
            }
        }
        outcome
    }

    /// Run the gate and summarize it for a batch report.
    #[must_use]
    pub fn verify_summary(&self) -> (GateOutcome, GateSummary) {
        let started = Instant::now();
        let outcome = self.verify();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = GateSummary::from_outcome(&self.command, &outcome, duration_ms);
        (outcome, summary)
    }

    fn run(&self) -> Result<GateOutcome> {
        ensure_dir(&self.log_dir)?;
        let (stdout_log, stderr_log) = self.log_paths();
        let stdout = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&stdout_log)?;
        let stderr = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&stderr_log)?;

        let mut command = shell_command(&self.command);
        command
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;
        let status = child.wait_timeout(self.timeout)?;

        let outcome = match status {
            Some(status) => {
                let output = collect_output(&stdout_log, &stderr_log);
                if status.success() {
                    GateOutcome::Success { output }
                } else {
                    GateOutcome::Failure {
                        exit_code: status.code(),
                        output,
                    }
                }
            }
            None => {
                terminate_process_group(child.id());
                // The leader may already be gone after the group signal.
                if let Err(error) = child.kill() {
                    tracing::debug!(error = %error, "gate leader already exited");
                }
                match child.wait() {
                    Ok(status) => tracing::debug!(status = %status, "timed out gate reaped"),
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to reap timed out gate");
                    }
                }
                GateOutcome::Timeout {
                    seconds: self.timeout.as_secs(),
                    output: collect_output(&stdout_log, &stderr_log),
                }
            }
        };

        Ok(outcome)
    }
}

/// TERM then KILL every process in the group led by `leader_pid`, so
/// builds spawned by the shell die with it.
#[cfg(unix)]
fn terminate_process_group(leader_pid: u32) {
    if leader_pid == 0 {
        return;
    }
    let group = format!("-{leader_pid}");
    for (signal, pause) in [("-TERM", TERMINATE_GRACE), ("-KILL", Duration::ZERO)] {
        let status = Command::new("kill")
            .arg(signal)
            .arg("--")
            .arg(&group)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(error) = status {
            tracing::warn!(signal, error = %error, "failed to signal gate process group");
        }
        thread::sleep(pause);
    }
}

#[cfg(not(unix))]
fn terminate_process_group(_leader_pid: u32) {}

#[cfg(unix)]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[cfg(not(unix))]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(script);
    command
}

fn collect_output(stdout_log: &Path, stderr_log: &Path) -> String {
    let stdout = fs::read(stdout_log).unwrap_or_default();
    let stderr = fs::read(stderr_log).unwrap_or_default();
    let mut combined = String::from_utf8_lossy(&stdout).into_owned();
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(&stderr));
    }
    tail_string(&combined, OUTPUT_TAIL_BYTES)
}
