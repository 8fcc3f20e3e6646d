//! Shared domain types for the agent loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code recorded when the process could not be spawned or an I/O step failed.
pub const EXIT_SPAWN_FAILED: i32 = -1;
/// Exit code recorded when the wall-clock timeout fired.
pub const EXIT_TIMED_OUT: i32 = -2;
/// Exit code recorded when a run-level cancellation killed the process group.
pub const EXIT_CANCELLED: i32 = -3;

/// One structured proposal decoded from a completion response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Run a shell command inside the workspace.
    RunCommand {
        command: String,
        #[serde(default)]
        reasoning: String,
    },
    /// Write `content` to a workspace-relative `path`.
    WriteFile {
        path: String,
        content: String,
        #[serde(default)]
        reasoning: String,
    },
    /// Explicit completion flag. Declared deliverables are verified against the workspace.
    #[serde(rename = "complete")]
    SignalComplete {
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        deliverables: Vec<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::RunCommand { .. } => "run_command",
            Action::WriteFile { .. } => "write_file",
            Action::SignalComplete { .. } => "complete",
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Action::RunCommand { reasoning, .. }
            | Action::WriteFile { reasoning, .. }
            | Action::SignalComplete { reasoning, .. } => reasoning,
        }
    }

    /// Short human-readable description used in summaries and reports.
    pub fn describe(&self) -> String {
        match self {
            Action::RunCommand { command, .. } => format!("run `{}`", one_line(command, 120)),
            Action::WriteFile { path, content, .. } => {
                format!("write {} ({} bytes)", path, content.len())
            }
            Action::SignalComplete { .. } => "signal completion".to_string(),
        }
    }

    /// Canonical JSON encoding, the same shape the normalizer accepts.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn one_line(text: &str, limit: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut: String = flat.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

/// Validator decision for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Approved,
    Rejected(String),
    RequiresRewrite(String),
}

impl ValidationVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationVerdict::Approved)
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationVerdict::Approved => write!(f, "approved"),
            ValidationVerdict::Rejected(reason) => write!(f, "rejected: {reason}"),
            ValidationVerdict::RequiresRewrite(reason) => write!(f, "requires rewrite: {reason}"),
        }
    }
}

/// Outcome of running one approved action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    /// Result for an action that never produced a process (spawn or I/O failure).
    pub fn fault(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_code: EXIT_SPAWN_FAILED,
            stdout: String::new(),
            stderr: message.into(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration_ms,
            timed_out: false,
            cancelled: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_fault(&self) -> bool {
        self.exit_code == EXIT_SPAWN_FAILED
    }
}

/// Token counts reported by the completion service for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Why the completion service stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    /// Cut off by the output length limit; the text is partial.
    Length,
    #[serde(other)]
    Other,
}

/// Which decoding step rejected a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKind {
    Truncated,
    InvalidJson,
    SchemaViolation,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MalformedKind::Truncated => "truncated",
            MalformedKind::InvalidJson => "invalid json",
            MalformedKind::SchemaViolation => "schema violation",
        };
        f.write_str(label)
    }
}

/// Recoverable per-turn failures. Each is fed back to the model as an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnError {
    #[error("validation rejected: {reason}")]
    ValidationRejected { reason: String },
    #[error("rewrite required: {reason}")]
    RewriteRequired { reason: String },
    #[error("execution timed out after {timeout_ms} ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("execution fault: {message}")]
    ExecutionFault { message: String },
    #[error("malformed response ({malformed}): {detail}")]
    MalformedResponse { malformed: MalformedKind, detail: String },
}

/// Fatal conditions that move a run to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("completion service unavailable: {0}")]
    CompletionServiceUnavailable(String),
    #[error("workspace unwritable: {0}")]
    WorkspaceUnwritable(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("run timed out")]
    RunTimedOut,
}

/// Orchestrator state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingCompletionService,
    Completed,
    Failed,
    BudgetExhausted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::BudgetExhausted
        )
    }

    /// Allowed edges of the state machine. Terminal states have none.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match self {
            RunStatus::Running => matches!(
                next,
                RunStatus::AwaitingCompletionService
                    | RunStatus::Completed
                    | RunStatus::Failed
                    | RunStatus::BudgetExhausted
            ),
            RunStatus::AwaitingCompletionService => {
                matches!(next, RunStatus::Running | RunStatus::Failed)
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::BudgetExhausted => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingCompletionService => "awaiting_completion_service",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::BudgetExhausted => "budget_exhausted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only iteration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-indexed turn number.
    pub iteration: u32,
    /// Concatenated response text, all continuation fragments included.
    pub response: String,
    pub action: Option<Action>,
    pub verdict: Option<ValidationVerdict>,
    pub result: Option<ExecutionResult>,
    pub error: Option<TurnError>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    /// Continuation calls made after the first call of this turn.
    pub continuations: u32,
    /// Text fed back to the model for this turn.
    pub observation: String,
}

impl TurnRecord {
    pub fn signals_completion(&self) -> bool {
        matches!(self.action, Some(Action::SignalComplete { .. })) && self.error.is_none()
    }

    /// One-line outcome used in history summaries and reports.
    pub fn outcome(&self) -> String {
        if let Some(error) = &self.error {
            return error.to_string();
        }
        match (&self.action, &self.result) {
            (Some(Action::SignalComplete { .. }), _) => "completion signalled".to_string(),
            (_, Some(result)) if result.success() => "exit 0".to_string(),
            (_, Some(result)) => format!("exit {}", result.exit_code),
            _ => "no result".to_string(),
        }
    }
}
