//! Test helpers: a scripted completion client, a recording executor and a temp project.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;

use crate::core::types::{Action, ExecutionResult, FinishReason, TokenUsage};
use crate::core::validator::Approved;
use crate::io::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use crate::io::config::{AgentConfig, write_config};
use crate::io::init::{AgentPaths, InitOptions, init_agent};
use crate::io::process::CancelToken;
use crate::io::sandbox::{ActionExecutor, ConfinedExecutor};
use crate::io::task::{TaskConfig, write_task};
use crate::orchestrator::{RunSetup, TaskOverrides};

/// A complete reply with a small fixed usage.
pub fn reply(text: &str) -> Result<CompletionResponse, CompletionError> {
    Ok(CompletionResponse {
        text: text.to_string(),
        finish_reason: FinishReason::Stop,
        usage: TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
        },
    })
}

/// A reply cut off by the length limit.
pub fn truncated(text: &str) -> Result<CompletionResponse, CompletionError> {
    Ok(CompletionResponse {
        finish_reason: FinishReason::Length,
        ..reply(text)?
    })
}

/// Replays canned replies in order and records every request. Once the script
/// runs out the service reports itself unavailable.
#[derive(Debug, Default)]
pub struct ScriptedCompletionClient {
    replies: Mutex<VecDeque<Result<CompletionResponse, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new(replies: Vec<Result<CompletionResponse, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl CompletionClient for ScriptedCompletionClient {
    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse, CompletionError> {
        if cancel.is_cancelled() {
            return Err(CompletionError::Cancelled);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".to_string())))
    }
}

/// Records every action that reaches execution, then delegates.
#[derive(Debug)]
pub struct RecordingExecutor<X> {
    inner: X,
    executed: Mutex<Vec<Action>>,
}

impl<X> RecordingExecutor<X> {
    pub fn new(inner: X) -> Self {
        Self {
            inner,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<Action> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl RecordingExecutor<ConfinedExecutor> {
    /// A real confined executor for the run's workspace.
    pub fn confined(setup: &RunSetup) -> Self {
        Self::new(ConfinedExecutor::new(
            setup.workspace.clone(),
            setup.config.executor_settings(),
        ))
    }
}

impl<X: ActionExecutor> ActionExecutor for RecordingExecutor<X> {
    fn execute(
        &self,
        approved: Approved<'_>,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> ExecutionResult {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(approved.action().clone());
        }
        self.inner.execute(approved, cancel, deadline)
    }
}

/// An initialized project in a temp directory, configured for fast tests.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new(task: &str, max_iterations: u32) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_agent(temp.path(), &InitOptions { force: false })?;
        let config = AgentConfig {
            shell: PathBuf::from("/bin/sh"),
            ..AgentConfig::default()
        };
        write_config(&paths.config_path, &config)?;
        write_task(
            &paths.task_path,
            &TaskConfig {
                task_description: task.to_string(),
                max_iterations,
                context_files: Vec::new(),
            },
        )?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> AgentPaths {
        AgentPaths::new(self.root())
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.root().join("workspace")
    }

    pub fn setup(&self) -> Result<RunSetup> {
        RunSetup::load(self.root(), "run-test".to_string(), &TaskOverrides::default())
    }
}
