//! Confined execution of approved actions.
//!
//! [`ActionExecutor`] is the seam the orchestrator drives; tests substitute a recording
//! executor. [`ConfinedExecutor`] runs commands through the configured shell with the
//! workspace as cwd and HOME, a scrubbed environment, a wall-clock bound and
//! process-group termination.

use std::env;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::core::budget::bounded_timeout;
use crate::core::types::{Action, EXIT_CANCELLED, EXIT_TIMED_OUT, ExecutionResult};
use crate::core::validator::Approved;
use crate::io::process::{CancelToken, CommandOutput, run_command_with_timeout};
use crate::io::workspace::Workspace;

/// Fixed search path for commands. The parent's PATH is never inherited.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs approved actions. Implementations never return errors; faults become results.
pub trait ActionExecutor {
    fn execute(
        &self,
        approved: Approved<'_>,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> ExecutionResult;
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub shell: PathBuf,
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
    /// Parent environment variables copied into the child, by name.
    pub env_allowlist: Vec<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/bash"),
            command_timeout: Duration::from_secs(30),
            output_limit_bytes: 8000,
            env_allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfinedExecutor {
    workspace: Workspace,
    settings: ExecutorSettings,
}

impl ConfinedExecutor {
    pub fn new(workspace: Workspace, settings: ExecutorSettings) -> Self {
        Self {
            workspace,
            settings,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn command(&self, script: &str) -> Command {
        let root = self.workspace.root();
        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg("-c")
            .arg(script)
            .current_dir(root)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", root)
            .env("PWD", root)
            .env("TERM", "dumb");
        for name in &self.settings.env_allowlist {
            if let Some(value) = env::var_os(name) {
                cmd.env(name, value);
            }
        }
        cmd
    }

    #[instrument(skip_all, fields(command_len = script.len()))]
    fn run_command(
        &self,
        script: &str,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> ExecutionResult {
        let Some(timeout) = bounded_timeout(self.settings.command_timeout, deadline) else {
            warn!("run deadline passed before the command started");
            return timed_out_without_running();
        };
        let started = Instant::now();
        match run_command_with_timeout(
            self.command(script),
            None,
            timeout,
            self.settings.output_limit_bytes,
            cancel,
        ) {
            Ok(output) => {
                let result = execution_result(&output);
                info!(exit_code = result.exit_code, duration_ms = result.duration_ms, "command finished");
                result
            }
            Err(err) => {
                warn!(err = %err, "command could not be run");
                ExecutionResult::fault(format!("{err:#}"), elapsed_ms(started))
            }
        }
    }

    #[instrument(skip_all, fields(path = %path, bytes = content.len()))]
    fn write_file(&self, path: &str, content: &str) -> ExecutionResult {
        let started = Instant::now();
        let target = match self.workspace.resolve(path) {
            Ok(target) => target,
            Err(err) => {
                warn!(err = %err, "write target escapes the workspace");
                return ExecutionResult::fault(err.to_string(), elapsed_ms(started));
            }
        };
        if let Some(parent) = target.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            return ExecutionResult::fault(
                format!("create {}: {err}", parent.display()),
                elapsed_ms(started),
            );
        }
        if let Err(err) = fs::write(&target, content) {
            return ExecutionResult::fault(format!("write {path}: {err}"), elapsed_ms(started));
        }
        info!("file written");
        ExecutionResult {
            exit_code: 0,
            stdout: format!("wrote {} bytes to {path}", content.len()),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration_ms: elapsed_ms(started),
            timed_out: false,
            cancelled: false,
        }
    }
}

impl ActionExecutor for ConfinedExecutor {
    fn execute(
        &self,
        approved: Approved<'_>,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> ExecutionResult {
        match approved.action() {
            Action::RunCommand { command, .. } => self.run_command(command, cancel, deadline),
            Action::WriteFile { path, content, .. } => self.write_file(path, content),
            Action::SignalComplete { .. } => ExecutionResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                stdout_truncated: 0,
                stderr_truncated: 0,
                duration_ms: 0,
                timed_out: false,
                cancelled: false,
            },
        }
    }
}

/// Map process output to an [`ExecutionResult`] with the synthetic exit codes.
fn execution_result(output: &CommandOutput) -> ExecutionResult {
    let exit_code = if output.timed_out {
        EXIT_TIMED_OUT
    } else if output.cancelled {
        EXIT_CANCELLED
    } else {
        match (output.status.code(), output.status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => -signal,
            (None, None) => crate::core::types::EXIT_SPAWN_FAILED,
        }
    };
    ExecutionResult {
        exit_code,
        stdout: output.stdout_text(),
        stderr: output.stderr_text(),
        stdout_truncated: output.stdout_truncated,
        stderr_truncated: output.stderr_truncated,
        duration_ms: duration_ms(output.duration),
        timed_out: output.timed_out,
        cancelled: output.cancelled,
    }
}

fn timed_out_without_running() -> ExecutionResult {
    ExecutionResult {
        exit_code: EXIT_TIMED_OUT,
        stdout: String::new(),
        stderr: "run time budget exhausted".to_string(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration_ms: 0,
        timed_out: true,
        cancelled: false,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}
