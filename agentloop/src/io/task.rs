//! Task definition stored in `.agentloop/task.json`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskConfig {
    pub task_description: String,
    pub max_iterations: u32,
    /// Workspace-relative files whose contents are included in the first prompt.
    #[serde(default)]
    pub context_files: Vec<String>,
}

impl TaskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.task_description.trim().is_empty() {
            return Err(anyhow!("task_description must be non-empty"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        Ok(())
    }
}

pub fn load_task(path: &Path) -> Result<TaskConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let task: TaskConfig =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    task.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(task)
}

pub fn write_task(path: &Path, task: &TaskConfig) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(task).context("serialize task")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
