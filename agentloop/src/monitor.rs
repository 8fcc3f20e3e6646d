//! Passive token, cost and outcome counters for a run.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::pricing::RateTable;
use crate::core::types::{Action, TokenUsage, TurnError, TurnRecord};
use crate::io::run_state::write_atomic;

/// Counters as persisted to `metrics.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub model: String,
    pub iterations: u32,
    pub completion_calls: u32,
    pub continuation_calls: u32,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub commands_succeeded: u32,
    pub commands_failed: u32,
    pub files_written: u32,
    pub rejected: u32,
    pub rewrites_requested: u32,
    pub malformed_responses: u32,
    pub timeouts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct MonitoringRecorder {
    rates: RateTable,
    started: Instant,
    metrics: MetricsSnapshot,
    metrics_path: Option<PathBuf>,
}

impl MonitoringRecorder {
    pub fn new(model: impl Into<String>, rates: RateTable) -> Self {
        Self {
            rates,
            started: Instant::now(),
            metrics: MetricsSnapshot {
                model: model.into(),
                ..MetricsSnapshot::default()
            },
            metrics_path: None,
        }
    }

    /// Persist the snapshot to `path` after every turn.
    pub fn with_metrics_path(mut self, path: PathBuf) -> Self {
        self.metrics_path = Some(path);
        self
    }

    /// Count one completion call and return its estimated cost in USD.
    pub fn record_call(&mut self, usage: &TokenUsage) -> f64 {
        let cost = self.rates.cost(&self.metrics.model, usage);
        self.metrics.completion_calls += 1;
        self.metrics.usage.add(usage);
        self.metrics.cost_usd += cost;
        cost
    }

    /// Fold a finished turn into the counters. Usage was already counted per call.
    pub fn record_turn(&mut self, record: &TurnRecord) {
        let m = &mut self.metrics;
        m.iterations += 1;
        m.continuation_calls += record.continuations;
        match &record.error {
            Some(TurnError::ValidationRejected { .. }) => m.rejected += 1,
            Some(TurnError::RewriteRequired { .. }) => m.rewrites_requested += 1,
            Some(TurnError::MalformedResponse { .. }) => m.malformed_responses += 1,
            Some(TurnError::ExecutionTimeout { .. }) => m.timeouts += 1,
            Some(TurnError::ExecutionFault { .. }) | None => {}
        }
        if let Some(result) = &record.result {
            match record.action {
                Some(Action::RunCommand { .. }) if result.success() => m.commands_succeeded += 1,
                Some(Action::RunCommand { .. }) => m.commands_failed += 1,
                Some(Action::WriteFile { .. }) if result.success() => m.files_written += 1,
                _ => {}
            }
        }
        debug!(
            iteration = record.iteration,
            total_tokens = m.usage.total(),
            cost_usd = m.cost_usd,
            "turn recorded"
        );
        self.persist();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ..self.metrics.clone()
        }
    }

    /// One-line human summary for the CLI.
    pub fn summary(&self) -> String {
        let m = self.snapshot();
        format!(
            "{} turns, {} completion calls ({} continuations), {} tokens, ${:.4}, \
             {} commands ok, {} failed, {} refused, {:.1}s",
            m.iterations,
            m.completion_calls,
            m.continuation_calls,
            m.usage.total(),
            m.cost_usd,
            m.commands_succeeded,
            m.commands_failed,
            m.rejected,
            m.elapsed_ms as f64 / 1000.0,
        )
    }

    fn persist(&self) {
        let Some(path) = &self.metrics_path else {
            return;
        };
        let written = serde_json::to_string_pretty(&self.snapshot())
            .map_err(anyhow::Error::from)
            .and_then(|buf| write_atomic(path, &(buf + "\n")));
        if let Err(err) = written {
            warn!(path = %path.display(), err = %format!("{err:#}"), "failed to persist metrics");
        }
    }
}
