//! Scaffolding for `.agentloop/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{AgentConfig, write_config};
use super::prompt::DEFAULT_SYSTEM_PROMPT;
use super::run_state::{RunState, write_run_state};
use super::task::{TaskConfig, write_task};

/// All canonical paths within `.agentloop/` for a project root.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub agent_dir: PathBuf,
    pub state_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub task_path: PathBuf,
    pub system_prompt_path: PathBuf,
    pub run_state_path: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let agent_dir = root.join(".agentloop");
        let state_dir = agent_dir.join("state");
        Self {
            runs_dir: agent_dir.join("runs"),
            gitignore_path: agent_dir.join(".gitignore"),
            config_path: agent_dir.join("config.toml"),
            task_path: agent_dir.join("task.json"),
            system_prompt_path: agent_dir.join("system_prompt.md"),
            run_state_path: state_dir.join("run_state.json"),
            state_dir,
            agent_dir,
            root,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite existing agent-owned files.
    pub force: bool,
}

/// Create `.agentloop/` scaffolding and the default workspace in `root`.
///
/// Fails if `.agentloop/` already exists unless `options.force` is set. Run
/// history under `runs/` is never removed.
pub fn init_agent(root: &Path, options: &InitOptions) -> Result<AgentPaths> {
    let paths = AgentPaths::new(root);
    if paths.agent_dir.exists() && !paths.agent_dir.is_dir() {
        return Err(anyhow!("init: .agentloop exists but is not a directory"));
    }
    if paths.agent_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .agentloop already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.agent_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.runs_dir)?;

    let config = AgentConfig::default();
    create_dir(&config.workspace_root(root))?;
    write_config(&paths.config_path, &config)?;
    write_task(&paths.task_path, &placeholder_task())?;
    write_file(&paths.system_prompt_path, DEFAULT_SYSTEM_PROMPT)?;
    write_file(&paths.gitignore_path, AGENT_GITIGNORE)?;
    write_run_state(&paths.run_state_path, &RunState::default())?;
    Ok(paths)
}

fn placeholder_task() -> TaskConfig {
    TaskConfig {
        task_description: TASK_PLACEHOLDER.to_string(),
        max_iterations: 20,
        context_files: Vec::new(),
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const TASK_PLACEHOLDER: &str = "Describe the task here.";
const AGENT_GITIGNORE: &str = "state/\nruns/\n";
