//! Run state snapshot (`.agentloop/state/run_state.json`).
//!
//! Rewritten atomically after every turn so an external monitor can read it at any time.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{FailureReason, RunStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub run_id: Option<String>,
    /// Completed turns so far.
    pub iteration: u32,
    pub task_completed: bool,
    pub status: Option<RunStatus>,
    pub deliverables: Vec<String>,
    pub failure: Option<FailureReason>,
    /// RFC 3339 UTC timestamp of the last write.
    pub updated_at: Option<String>,
}

pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), run_id = ?state.run_id, iteration = state.iteration, status = ?state.status, "writing run state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies write → read preserves all fields, including a typed failure.
    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/run_state.json");

        let state = RunState {
            run_id: Some("run-20260101T000000Z-abc123".to_string()),
            iteration: 4,
            task_completed: false,
            status: Some(RunStatus::Failed),
            deliverables: vec!["a.txt".to_string()],
            failure: Some(FailureReason::CompletionServiceUnavailable("down".to_string())),
            updated_at: Some("2026-01-01T00:00:00Z".to_string()),
        };

        write_run_state(&path, &state).expect("write");
        assert_eq!(load_run_state(&path).expect("load"), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    /// Ensures the on-disk field names stay stable for external monitors.
    #[test]
    fn run_state_json_shape_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        let state = RunState {
            status: Some(RunStatus::BudgetExhausted),
            ..RunState::default()
        };
        write_run_state(&path, &state).expect("write");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["status"], "budget_exhausted");
        assert_eq!(value["task_completed"], false);
        assert_eq!(value["iteration"], 0);
        assert!(value["run_id"].is_null());
    }
}
