//! Per-turn artifacts under `runs/<run_id>/iterations/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{RunStatus, TokenUsage, TurnError, TurnRecord, ValidationVerdict};

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta<'a> {
    pub run_id: &'a str,
    pub iteration: u32,
    pub status: RunStatus,
    pub action: Option<&'static str>,
    pub verdict: Option<&'a ValidationVerdict>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: Option<u64>,
    pub error: Option<&'a TurnError>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub continuations: u32,
    pub recorded_at: String,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub response_path: PathBuf,
    pub action_path: PathBuf,
    pub observation_path: PathBuf,
}

impl IterationPaths {
    pub fn new(run_dir: &Path, iteration: u32) -> Self {
        let dir = run_dir.join("iterations").join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            response_path: dir.join("response.txt"),
            action_path: dir.join("action.json"),
            observation_path: dir.join("observation.md"),
            dir,
        }
    }
}

/// Write one turn's artifacts. `action.json` is only written when an action was decoded.
pub fn write_iteration(
    run_dir: &Path,
    run_id: &str,
    record: &TurnRecord,
    status: RunStatus,
) -> Result<IterationPaths> {
    let paths = IterationPaths::new(run_dir, record.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    let meta = IterationMeta {
        run_id,
        iteration: record.iteration,
        status,
        action: record.action.as_ref().map(|a| a.kind()),
        verdict: record.verdict.as_ref(),
        exit_code: record.result.as_ref().map(|r| r.exit_code),
        timed_out: record.result.as_ref().is_some_and(|r| r.timed_out),
        duration_ms: record.result.as_ref().map(|r| r.duration_ms),
        error: record.error.as_ref(),
        usage: record.usage,
        cost_usd: record.cost_usd,
        continuations: record.continuations,
        recorded_at: chrono::Utc::now().to_rfc3339(),
    };
    write_json(&paths.meta_path, &meta)?;
    write_text(&paths.response_path, &record.response)?;
    if let Some(action) = &record.action {
        write_json(&paths.action_path, action)?;
    }
    write_text(&paths.observation_path, &record.observation)?;
    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
