//! Agent configuration stored under `.agentloop/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::pricing::ModelRate;
use crate::core::validator::DEFAULT_ALLOWED_HOSTS;
use crate::io::completion::RetryPolicy;
use crate::io::sandbox::ExecutorSettings;

/// Agent configuration (TOML). Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Wall-clock bound for a single command.
    pub command_timeout_secs: u64,

    /// Optional wall-clock bound for the whole run.
    pub run_timeout_secs: Option<u64>,

    /// Per-stream capture limit for command output.
    pub output_limit_bytes: usize,

    /// Per-stream limit of command output echoed back to the model.
    pub observation_limit_bytes: usize,

    /// Recent turns sent verbatim; older turns are summarized.
    pub history_window: usize,

    /// Soft limit for the task message; droppable sections go first.
    pub prompt_budget_bytes: usize,

    /// Continuation calls allowed after the first call of a turn.
    pub max_continuations: u32,

    /// Workspace root, relative to the project root unless absolute.
    pub workspace_dir: PathBuf,

    pub shell: PathBuf,

    /// Parent environment variables passed through to commands.
    pub env_allowlist: Vec<String>,

    /// Hosts `curl`/`wget` may reach.
    pub allowed_hosts: Vec<String>,

    pub completion: CompletionConfig,

    /// Per-model rate overrides in USD per million tokens.
    pub pricing: BTreeMap<String, ModelRate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Command line that reads a request JSON on stdin and prints a response JSON.
    pub command: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 8000,
            command_timeout_secs: 30,
            run_timeout_secs: None,
            output_limit_bytes: 8000,
            observation_limit_bytes: 4000,
            history_window: 8,
            prompt_budget_bytes: 40_000,
            max_continuations: 5,
            workspace_dir: PathBuf::from("workspace"),
            shell: PathBuf::from("/bin/bash"),
            env_allowlist: vec!["LANG".to_string(), "LC_ALL".to_string(), "TZ".to_string()],
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            completion: CompletionConfig::default(),
            pricing: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within 0.0..=2.0"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(anyhow!("run_timeout_secs must be > 0 when set"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.observation_limit_bytes == 0 {
            return Err(anyhow!("observation_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(anyhow!("workspace_dir must be non-empty"));
        }
        if !self.shell.is_absolute() {
            return Err(anyhow!("shell must be an absolute path"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be > 0"));
        }
        for (model, rate) in &self.pricing {
            if rate.input < 0.0 || rate.output < 0.0 {
                return Err(anyhow!("pricing.{model} rates must be >= 0"));
            }
        }
        Ok(())
    }

    /// Workspace root resolved against the project root.
    pub fn workspace_root(&self, project_root: &Path) -> PathBuf {
        if self.workspace_dir.is_absolute() {
            self.workspace_dir.clone()
        } else {
            project_root.join(&self.workspace_dir)
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            shell: self.shell.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
            env_allowlist: self.env_allowlist.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.completion.max_retries,
            backoff: Duration::from_millis(self.completion.retry_backoff_ms),
        }
    }
}

/// Load config from a TOML file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
