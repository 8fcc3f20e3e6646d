//! End-of-run artifacts: `session.json`, `REPORT.md` and `deliverables/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::types::{Action, FailureReason, RunStatus, TurnRecord};
use crate::io::run_state::write_atomic;
use crate::io::workspace::Workspace;
use crate::monitor::MetricsSnapshot;

const REPORT_TEMPLATE: &str = include_str!("prompts/report.md");

/// Run metadata written to `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub run_id: String,
    pub task: String,
    pub model: String,
    pub max_iterations: u32,
    /// RFC 3339 UTC.
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: f64,
    pub status: RunStatus,
    pub failure: Option<FailureReason>,
    pub iterations: u32,
    pub deliverables: Vec<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub session_path: PathBuf,
    pub report_path: PathBuf,
    pub deliverables_dir: PathBuf,
}

impl ReportPaths {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            session_path: run_dir.join("session.json"),
            report_path: run_dir.join("REPORT.md"),
            deliverables_dir: run_dir.join("deliverables"),
        }
    }
}

#[derive(Debug, Serialize)]
struct TurnSummary {
    iteration: u32,
    reasoning: String,
    action: String,
    outcome: String,
}

/// Write every end-of-run artifact into `run_dir`.
pub fn write_report(
    run_dir: &Path,
    session: &SessionRecord,
    history: &[TurnRecord],
    workspace: &Workspace,
) -> Result<ReportPaths> {
    let paths = ReportPaths::new(run_dir);
    let mut buf = serde_json::to_string_pretty(session).context("serialize session")?;
    buf.push('\n');
    write_atomic(&paths.session_path, &buf)?;

    let report = render_report(session, history)?;
    fs::write(&paths.report_path, report)
        .with_context(|| format!("write {}", paths.report_path.display()))?;

    let copied = copy_deliverables(workspace, &session.deliverables, &paths.deliverables_dir)?;
    info!(run_id = %session.run_id, copied, "run report written");
    Ok(paths)
}

pub fn render_report(session: &SessionRecord, history: &[TurnRecord]) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("report", REPORT_TEMPLATE)?;
    let turns: Vec<TurnSummary> = history
        .iter()
        .map(|record| TurnSummary {
            iteration: record.iteration,
            reasoning: record
                .action
                .as_ref()
                .map(|a| a.reasoning().split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default(),
            action: record
                .action
                .as_ref()
                .map_or_else(|| "none decoded".to_string(), Action::describe),
            outcome: record.outcome(),
        })
        .collect();
    let m = &session.metrics;
    let rendered = env.get_template("report")?.render(context! {
        run_id => &session.run_id,
        task => session.task.split_whitespace().collect::<Vec<_>>().join(" "),
        model => &session.model,
        status => session.status.as_str(),
        failure => session.failure.as_ref().map(ToString::to_string),
        started_at => &session.started_at,
        finished_at => &session.finished_at,
        duration_secs => format!("{:.1}", session.duration_secs),
        iterations => session.iterations,
        commands_ok => m.commands_succeeded,
        commands_failed => m.commands_failed,
        rejected => m.rejected,
        prompt_tokens => m.usage.prompt_tokens,
        completion_tokens => m.usage.completion_tokens,
        cost_usd => format!("{:.4}", m.cost_usd),
        deliverables => &session.deliverables,
        turns => turns,
    })?;
    Ok(rendered)
}

/// Copy each deliverable under `dest`, keeping its relative path. Returns the count copied.
fn copy_deliverables(workspace: &Workspace, deliverables: &[String], dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for path in deliverables {
        let source = match workspace.resolve(path) {
            Ok(source) if source.is_file() => source,
            Ok(_) => {
                warn!(path = %path, "deliverable is not a regular file; not copied");
                continue;
            }
            Err(err) => {
                warn!(path = %path, err = %err, "deliverable escapes the workspace; not copied");
                continue;
            }
        };
        let target = dest.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::copy(&source, &target)
            .with_context(|| format!("copy {} to {}", source.display(), target.display()))?;
        copied += 1;
    }
    Ok(copied)
}
