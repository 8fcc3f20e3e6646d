//! The run state machine: propose, validate, execute, observe, repeat.
//!
//! One [`Orchestrator`] owns one run. Each turn builds the prompt from the task and
//! the history, asks the completion service for an action (following up with
//! continuation requests while the reply is cut off), validates it, executes it when
//! approved and feeds the outcome back as the next observation. Rejections, malformed
//! replies, timeouts and faults are ordinary turns; only the conditions in
//! [`FailureReason`] end a run in `Failed`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::bounded_timeout;
use crate::core::normalizer::normalize_response;
use crate::core::pricing::RateTable;
use crate::core::types::{
    Action, ExecutionResult, FailureReason, FinishReason, RunStatus, TokenUsage, TurnError,
    TurnRecord, ValidationVerdict,
};
use crate::core::validator::{RuleSet, SecurityValidator};
use crate::io::completion::{CompletionClient, CompletionError, CompletionRequest, Message};
use crate::io::config::{AgentConfig, load_config};
use crate::io::context::{ContextFile, load_context_files};
use crate::io::init::AgentPaths;
use crate::io::iteration_log::write_iteration;
use crate::io::process::CancelToken;
use crate::io::prompt::{PromptBuilder, TaskPromptInputs, render_observation, summarize_turns};
use crate::io::report::{SessionRecord, write_report};
use crate::io::run_state::{RunState, write_run_state};
use crate::io::sandbox::ActionExecutor;
use crate::io::task::{TaskConfig, load_task};
use crate::io::workspace::{Snapshot, Workspace};
use crate::monitor::{MetricsSnapshot, MonitoringRecorder};

/// Default bound on continuation calls after the first call of a turn.
pub const MAX_CONTINUATIONS: u32 = 5;

/// User message sent after a reply that was cut off by the length limit.
pub const CONTINUE_PROMPT: &str = "Continue.";

/// `run-<UTC timestamp>-<6 random chars>`.
pub fn generate_run_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("run-{}-{suffix}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Command-line overrides applied on top of `task.json`.
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub task_description: Option<String>,
    pub max_iterations: Option<u32>,
}

/// Everything a run needs, loaded from `.agentloop/`.
#[derive(Debug, Clone)]
pub struct RunSetup {
    pub run_id: String,
    pub paths: AgentPaths,
    pub config: AgentConfig,
    pub task: TaskConfig,
    pub system_prompt: String,
    pub workspace: Workspace,
}

impl RunSetup {
    /// Load config, task and system prompt for `root`. A missing system prompt is fatal.
    pub fn load(root: &Path, run_id: String, overrides: &TaskOverrides) -> Result<Self> {
        let paths = AgentPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let mut task = load_task(&paths.task_path)?;
        if let Some(description) = &overrides.task_description {
            task.task_description = description.clone();
        }
        if let Some(max_iterations) = overrides.max_iterations {
            task.max_iterations = max_iterations;
        }
        task.validate().context("validate task overrides")?;
        let system_prompt = fs::read_to_string(&paths.system_prompt_path).with_context(|| {
            format!("read system prompt {}", paths.system_prompt_path.display())
        })?;
        let workspace = Workspace::open(&config.workspace_root(root))?;
        Ok(Self {
            run_id,
            paths,
            config,
            task,
            system_prompt,
            workspace,
        })
    }

    pub fn run_dir(&self) -> PathBuf {
        self.paths.run_dir(&self.run_id)
    }

    /// Validator bound to this run's workspace and host allow-list.
    pub fn validator(&self) -> SecurityValidator {
        SecurityValidator::new(
            RuleSet::new(self.workspace.root()).with_allowed_hosts(self.config.allowed_hosts.clone()),
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub iterations: u32,
    pub task_completed: bool,
    pub deliverables: Vec<String>,
    pub failure: Option<FailureReason>,
    pub metrics: MetricsSnapshot,
    pub run_dir: PathBuf,
}

/// Concatenated reply of one turn, continuation fragments included.
#[derive(Debug, Default)]
struct Reply {
    text: String,
    truncated: bool,
    usage: TokenUsage,
    cost_usd: f64,
    continuations: u32,
}

enum TurnStep {
    Recorded(TurnRecord),
    Fatal(FailureReason),
}

pub struct Orchestrator<'a, C, X> {
    client: &'a C,
    executor: &'a X,
    cancel: CancelToken,
    setup: RunSetup,
    validator: SecurityValidator,
    monitor: MonitoringRecorder,
    status: RunStatus,
    history: Vec<TurnRecord>,
    context_files: Vec<ContextFile>,
    deliverables: Vec<String>,
    failure: Option<FailureReason>,
}

impl<'a, C: CompletionClient, X: ActionExecutor> Orchestrator<'a, C, X> {
    pub fn new(client: &'a C, executor: &'a X, setup: RunSetup, cancel: CancelToken) -> Self {
        let rates = RateTable::with_overrides(&setup.config.pricing);
        let monitor = MonitoringRecorder::new(setup.config.model.clone(), rates)
            .with_metrics_path(setup.run_dir().join("metrics.json"));
        Self {
            client,
            executor,
            cancel,
            validator: setup.validator(),
            monitor,
            status: RunStatus::Running,
            history: Vec::new(),
            context_files: Vec::new(),
            deliverables: Vec::new(),
            failure: None,
            setup,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    fn iteration(&self) -> u32 {
        u32::try_from(self.history.len()).unwrap_or(u32::MAX)
    }

    /// Drive the run to a terminal state.
    ///
    /// Errors are infrastructure problems (state directory unwritable, template
    /// failure); every domain outcome is reported through [`RunOutcome`].
    #[instrument(skip_all, fields(run_id = %self.setup.run_id))]
    pub fn run(mut self) -> Result<RunOutcome> {
        let started = Instant::now();
        let started_at = Utc::now();
        let deadline = self
            .setup
            .config
            .run_timeout_secs
            .map(|secs| started + Duration::from_secs(secs));
        info!(
            max_iterations = self.setup.task.max_iterations,
            workspace = %self.setup.workspace.root().display(),
            "run started"
        );
        self.persist_state()?;

        if let Err(err) = self.setup.workspace.probe_writable() {
            self.fail(FailureReason::WorkspaceUnwritable(format!("{err:#}")))?;
            return self.finish(started, started_at);
        }
        let baseline = self.setup.workspace.snapshot()?;
        self.context_files = load_context_files(&self.setup.workspace, &self.setup.task.context_files);

        while !self.status.is_terminal() {
            if self.cancel.is_cancelled() {
                self.fail(FailureReason::Cancelled)?;
                break;
            }
            if self.iteration() >= self.setup.task.max_iterations {
                info!(iterations = self.iteration(), "iteration budget exhausted");
                self.transition(RunStatus::BudgetExhausted)?;
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.fail(FailureReason::RunTimedOut)?;
                break;
            }

            let record = match self.turn(deadline)? {
                TurnStep::Recorded(record) => record,
                TurnStep::Fatal(reason) => {
                    self.fail(reason)?;
                    break;
                }
            };
            if record.signals_completion() {
                self.deliverables = self.collect_deliverables(&baseline, &record)?;
                self.transition(RunStatus::Completed)?;
                info!(deliverables = ?self.deliverables, "task completed");
            }
            self.record(record)?;
        }
        self.finish(started, started_at)
    }

    fn turn(&mut self, deadline: Option<Instant>) -> Result<TurnStep> {
        let iteration = self.iteration() + 1;
        let mut messages = self.build_messages()?;
        self.transition(RunStatus::AwaitingCompletionService)?;
        let reply = match self.complete_with_continuations(&mut messages, deadline) {
            Ok(reply) => reply,
            Err(reason) => return Ok(TurnStep::Fatal(reason)),
        };
        self.transition(RunStatus::Running)?;

        let mut record = TurnRecord {
            iteration,
            action: None,
            verdict: None,
            result: None,
            error: None,
            usage: reply.usage,
            cost_usd: reply.cost_usd,
            continuations: reply.continuations,
            observation: String::new(),
            response: reply.text,
        };
        match normalize_response(&record.response, reply.truncated) {
            Ok(action) => self.dispatch(action, &mut record, deadline),
            Err(malformed) => {
                warn!(iteration, kind = %malformed.kind, detail = %malformed.detail, "malformed response");
                record.error = Some(malformed.into());
            }
        }
        record.observation = render_observation(&record, self.setup.config.observation_limit_bytes)?;
        Ok(TurnStep::Recorded(record))
    }

    /// Validate `action` and run it when approved. Completion is never executed.
    fn dispatch(&self, action: Action, record: &mut TurnRecord, deadline: Option<Instant>) {
        match self.validator.approve(&action) {
            Ok(approved) => {
                if !matches!(action, Action::SignalComplete { .. }) {
                    let result = self.executor.execute(approved, &self.cancel, deadline);
                    record.error = execution_error(&result);
                    record.result = Some(result);
                }
                record.verdict = Some(ValidationVerdict::Approved);
            }
            Err(verdict) => {
                info!(iteration = record.iteration, verdict = %verdict, "action not approved");
                record.error = match &verdict {
                    ValidationVerdict::Rejected(reason) => Some(TurnError::ValidationRejected {
                        reason: reason.clone(),
                    }),
                    ValidationVerdict::RequiresRewrite(reason) => Some(TurnError::RewriteRequired {
                        reason: reason.clone(),
                    }),
                    ValidationVerdict::Approved => None,
                };
                record.verdict = Some(verdict);
            }
        }
        record.action = Some(action);
    }

    /// Call the completion service, asking for continuations while the reply is cut off.
    fn complete_with_continuations(
        &mut self,
        messages: &mut Vec<Message>,
        deadline: Option<Instant>,
    ) -> Result<Reply, FailureReason> {
        let config = &self.setup.config;
        let max_continuations = config.max_continuations;
        let mut reply = Reply::default();
        loop {
            if self.cancel.is_cancelled() {
                return Err(FailureReason::Cancelled);
            }
            let timeout = bounded_timeout(Duration::from_secs(config.completion.timeout_secs), deadline)
                .ok_or(FailureReason::RunTimedOut)?;
            let request = CompletionRequest {
                model: config.model.clone(),
                messages: messages.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                timeout,
            };
            let response = self.client.complete(&request, &self.cancel).map_err(|err| match err {
                CompletionError::Unavailable(message) => {
                    FailureReason::CompletionServiceUnavailable(message)
                }
                CompletionError::Cancelled => FailureReason::Cancelled,
            })?;
            reply.cost_usd += self.monitor.record_call(&response.usage);
            reply.usage.add(&response.usage);
            reply.text.push_str(&response.text);

            if response.finish_reason != FinishReason::Length {
                return Ok(reply);
            }
            if reply.continuations >= max_continuations {
                warn!(continuations = reply.continuations, "response still truncated after continuations");
                reply.truncated = true;
                return Ok(reply);
            }
            reply.continuations += 1;
            debug!(continuation = reply.continuations, "response truncated; requesting continuation");
            messages.push(Message::assistant(response.text));
            messages.push(Message::user(CONTINUE_PROMPT));
        }
    }

    /// System prompt, task message, then the recent turns as assistant/user pairs.
    fn build_messages(&self) -> Result<Vec<Message>> {
        let config = &self.setup.config;
        let split = self.history.len().saturating_sub(config.history_window);
        let (older, recent) = self.history.split_at(split);
        let summary = (!older.is_empty()).then(|| summarize_turns(older));
        let task_message = PromptBuilder::new(config.prompt_budget_bytes).build_task(&TaskPromptInputs {
            task: &self.setup.task.task_description,
            max_iterations: self.setup.task.max_iterations,
            remaining: self.setup.task.max_iterations.saturating_sub(self.iteration()),
            context_files: &self.context_files,
            history: summary.as_deref(),
        })?;

        let mut messages = Vec::with_capacity(2 + recent.len() * 2);
        messages.push(Message::system(self.setup.system_prompt.clone()));
        messages.push(Message::user(task_message));
        for record in recent {
            messages.push(Message::assistant(record.response.clone()));
            messages.push(Message::user(record.observation.clone()));
        }
        Ok(messages)
    }

    /// Files changed since the run began plus verified declared deliverables.
    fn collect_deliverables(&self, baseline: &Snapshot, record: &TurnRecord) -> Result<Vec<String>> {
        let mut deliverables = self.setup.workspace.changed_since(baseline)?;
        if let Some(Action::SignalComplete { deliverables: declared, .. }) = &record.action {
            deliverables.extend(self.setup.workspace.verify_deliverables(declared));
        }
        deliverables.sort();
        deliverables.dedup();
        Ok(deliverables)
    }

    fn record(&mut self, record: TurnRecord) -> Result<()> {
        self.monitor.record_turn(&record);
        write_iteration(&self.setup.run_dir(), &self.setup.run_id, &record, self.status)?;
        debug!(iteration = record.iteration, outcome = %record.outcome(), "turn recorded");
        self.history.push(record);
        self.persist_state()
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            bail!("invalid run state transition {} -> {}", self.status, next);
        }
        debug!(from = %self.status, to = %next, "run state transition");
        self.status = next;
        Ok(())
    }

    fn fail(&mut self, reason: FailureReason) -> Result<()> {
        warn!(reason = %reason, "run failed");
        self.failure = Some(reason);
        self.transition(RunStatus::Failed)
    }

    fn persist_state(&self) -> Result<()> {
        write_run_state(
            &self.setup.paths.run_state_path,
            &RunState {
                run_id: Some(self.setup.run_id.clone()),
                iteration: self.iteration(),
                task_completed: self.status == RunStatus::Completed,
                status: Some(self.status),
                deliverables: self.deliverables.clone(),
                failure: self.failure.clone(),
                updated_at: Some(Utc::now().to_rfc3339()),
            },
        )
    }

    fn finish(self, started: Instant, started_at: DateTime<Utc>) -> Result<RunOutcome> {
        self.persist_state()?;
        let metrics = self.monitor.snapshot();
        let run_dir = self.setup.run_dir();
        let session = SessionRecord {
            run_id: self.setup.run_id.clone(),
            task: self.setup.task.task_description.clone(),
            model: self.setup.config.model.clone(),
            max_iterations: self.setup.task.max_iterations,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            duration_secs: started.elapsed().as_secs_f64(),
            status: self.status,
            failure: self.failure.clone(),
            iterations: self.iteration(),
            deliverables: self.deliverables.clone(),
            metrics: metrics.clone(),
        };
        if let Err(err) = write_report(&run_dir, &session, &self.history, &self.setup.workspace) {
            warn!(err = %format!("{err:#}"), "failed to write run report");
        }
        info!(status = %self.status, summary = %self.monitor.summary(), "run finished");
        Ok(RunOutcome {
            run_id: session.run_id,
            status: self.status,
            iterations: session.iterations,
            task_completed: self.status == RunStatus::Completed,
            deliverables: session.deliverables,
            failure: session.failure,
            metrics,
            run_dir,
        })
    }
}

/// Turn error implied by an execution result. Cancellation is handled by the run loop.
fn execution_error(result: &ExecutionResult) -> Option<TurnError> {
    if result.timed_out {
        Some(TurnError::ExecutionTimeout {
            timeout_ms: result.duration_ms,
        })
    } else if result.is_fault() {
        Some(TurnError::ExecutionFault {
            message: result.stderr.clone(),
        })
    } else {
        None
    }
}
