//! Prompt assembly for the completion service.
//!
//! The task message is rendered from a sectioned template and fitted to a byte
//! budget by dropping the droppable sections first. Observations and history
//! summaries are built from [`TurnRecord`]s.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::{Action, TurnError, TurnRecord};
use crate::io::context::ContextFile;

/// Default `system_prompt.md` written by `init`.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const OBSERVATION_TEMPLATE: &str = include_str!("prompts/observation.md");

/// Sections removed, in order, when the task message is over budget.
const DROP_ORDER: [&str; 2] = ["history", "context"];

const TRUNCATED_MARKER: &str = "\n[truncated]";

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        env.add_template("observation", OBSERVATION_TEMPLATE)
            .expect("observation template should be valid");
        Self { env }
    }
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Everything the task message is rendered from.
#[derive(Debug, Clone)]
pub struct TaskPromptInputs<'a> {
    pub task: &'a str,
    pub max_iterations: u32,
    /// Turns left including the one being prompted.
    pub remaining: u32,
    pub context_files: &'a [ContextFile],
    /// Summary of turns that fell out of the history window.
    pub history: Option<&'a str>,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output at `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section regex should compile")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then cut the last section if still over.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(section = key, bytes_dropped = dropped.content.len(), "dropped section for budget");
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if allowed > TRUNCATED_MARKER.len() {
        truncate_at_boundary(&mut last.content, allowed - TRUNCATED_MARKER.len());
        last.content.push_str(TRUNCATED_MARKER);
    } else {
        truncate_at_boundary(&mut last.content, allowed);
    }
    debug!(section = %last.key, before_len, after_len = last.content.len(), "truncated section for budget");
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds task messages within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_task(&self, input: &TaskPromptInputs<'_>) -> Result<String> {
        let template = ENGINE.env.get_template("task")?;
        let rendered = template.render(context! {
            task => input.task.trim(),
            max_iterations => input.max_iterations,
            remaining => input.remaining,
            context_files => input.context_files,
            history => input.history.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// Observation text fed back to the model for one turn. Command output is clipped
/// to `limit_bytes` per stream.
pub fn render_observation(record: &TurnRecord, limit_bytes: usize) -> Result<String> {
    let (kind, detail) = match &record.error {
        Some(TurnError::MalformedResponse { malformed, detail }) => {
            ("malformed", format!("{malformed}: {detail}"))
        }
        Some(TurnError::ValidationRejected { reason }) => ("rejected", reason.clone()),
        Some(TurnError::RewriteRequired { reason }) => ("rewrite", reason.clone()),
        Some(TurnError::ExecutionFault { message }) => ("fault", message.clone()),
        Some(TurnError::ExecutionTimeout { .. }) | None => ("executed", String::new()),
    };
    let result = record.result.as_ref();
    let template = ENGINE.env.get_template("observation")?;
    let rendered = template.render(context! {
        iteration => record.iteration,
        kind => kind,
        detail => detail,
        action => record.action.as_ref().map(Action::describe),
        exit_code => result.map(|r| r.exit_code),
        timed_out => result.is_some_and(|r| r.timed_out),
        cancelled => result.is_some_and(|r| r.cancelled),
        duration_ms => result.map(|r| r.duration_ms),
        stdout => result.map(|r| clip_middle(r.stdout.trim_end(), limit_bytes)),
        stderr => result.map(|r| clip_middle(r.stderr.trim_end(), limit_bytes)),
    })?;
    Ok(rendered.trim().to_string())
}

/// One line per turn, for turns outside the history window.
pub fn summarize_turns(records: &[TurnRecord]) -> String {
    records
        .iter()
        .map(|record| {
            let action = record
                .action
                .as_ref()
                .map_or_else(|| "no action".to_string(), Action::describe);
            format!("- turn {}: {} -> {}", record.iteration, action, record.outcome())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the head and tail of `text` within `limit` bytes, marking the gap.
pub fn clip_middle(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let omitted_hint = format!("\n[... {} bytes omitted ...]\n", text.len() - limit);
    let half = limit / 2;
    let head_end = floor_boundary(text, half);
    let tail_start = ceil_boundary(text, text.len() - (limit - half));
    format!("{}{}{}", &text[..head_end], omitted_hint, &text[tail_start..])
}

fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() > max {
        let end = floor_boundary(text, max);
        text.truncate(end);
    }
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutionResult, MalformedKind, TokenUsage};

    fn record(iteration: u32) -> TurnRecord {
        TurnRecord {
            iteration,
            response: String::new(),
            action: Some(Action::RunCommand {
                command: "ls".to_string(),
                reasoning: String::new(),
            }),
            verdict: None,
            result: None,
            error: None,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            continuations: 0,
            observation: String::new(),
        }
    }

    fn inputs<'a>(context: &'a [ContextFile], history: Option<&'a str>) -> TaskPromptInputs<'a> {
        TaskPromptInputs {
            task: "Create a.txt containing hi",
            max_iterations: 10,
            remaining: 7,
            context_files: context,
            history,
        }
    }

    /// Verifies sections appear in a fixed order: contract, task, context, history.
    #[test]
    fn task_sections_are_ordered() {
        let context = vec![ContextFile {
            path: "notes.md".to_string(),
            contents: "use utf-8".to_string(),
        }];
        let content = PromptBuilder::new(10_000)
            .build_task(&inputs(&context, Some("- turn 1: run `ls` -> exit 0")))
            .expect("render");

        let contract = content.find("### Contract").expect("contract");
        let task = content.find("### Task").expect("task");
        let ctx = content.find("#### notes.md").expect("context");
        let history = content.find("### Earlier Turns").expect("history");
        assert!(contract < task && task < ctx && ctx < history);
        assert!(content.contains("7 remain"));
        assert!(!content.contains("<!--"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let content = PromptBuilder::new(10_000)
            .build_task(&inputs(&[], Some("  ")))
            .expect("render");
        assert!(!content.contains("### Context Files"));
        assert!(!content.contains("### Earlier Turns"));
        assert!(content.contains("<task>\nCreate a.txt containing hi\n</task>"));
    }

    /// Verifies the history summary is dropped before context, and the task survives.
    #[test]
    fn budget_drops_history_first() {
        let context = vec![ContextFile {
            path: "notes.md".to_string(),
            contents: "short".to_string(),
        }];
        let history = "h".repeat(2_000);
        let content = PromptBuilder::new(600)
            .build_task(&inputs(&context, Some(&history)))
            .expect("render");
        assert!(!content.contains("### Earlier Turns"));
        assert!(content.contains("#### notes.md"));
        assert!(content.contains("### Task"));
    }

    #[test]
    fn oversized_required_section_is_truncated() {
        let task = "t".repeat(5_000);
        let input = TaskPromptInputs {
            task: &task,
            ..inputs(&[], None)
        };
        let content = PromptBuilder::new(400).build_task(&input).expect("render");
        assert!(content.ends_with("[truncated]"));
        assert!(content.len() <= 400 + "\n\n".len());
    }

    #[test]
    fn observation_for_rejection_says_nothing_ran() {
        let mut rec = record(3);
        rec.error = Some(TurnError::ValidationRejected {
            reason: "destructive filesystem: rm -rf /".to_string(),
        });
        let text = render_observation(&rec, 100).expect("render");
        assert!(text.starts_with("### Observation for turn 3"));
        assert!(text.contains("refused by the security validator: destructive filesystem"));
        assert!(text.contains("Nothing was executed"));
    }

    #[test]
    fn observation_for_malformed_reply_restates_format() {
        let mut rec = record(1);
        rec.action = None;
        rec.error = Some(TurnError::MalformedResponse {
            malformed: MalformedKind::InvalidJson,
            detail: "expected value".to_string(),
        });
        let text = render_observation(&rec, 100).expect("render");
        assert!(text.contains("invalid json: expected value"));
        assert!(text.contains("\"action\""));
    }

    #[test]
    fn observation_clips_command_output() {
        let mut rec = record(2);
        rec.result = Some(ExecutionResult {
            exit_code: 1,
            stdout: "a".repeat(50) + &"b".repeat(50),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration_ms: 5,
            timed_out: false,
            cancelled: false,
        });
        let text = render_observation(&rec, 20).expect("render");
        assert!(text.contains("Exit code: 1"));
        assert!(text.contains("aaaaaaaaaa\n[... 80 bytes omitted ...]\nbbbbbbbbbb"));
        assert!(!text.contains("stderr:"));
    }

    #[test]
    fn observation_reports_timeout() {
        let mut rec = record(4);
        rec.result = Some(ExecutionResult {
            exit_code: -2,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration_ms: 30_000,
            timed_out: true,
            cancelled: false,
        });
        rec.error = Some(TurnError::ExecutionTimeout { timeout_ms: 30_000 });
        let text = render_observation(&rec, 100).expect("render");
        assert!(text.contains("Exit code: -2 (timed out after 30000 ms)"));
        assert!(text.contains("(no output)"));
    }

    #[test]
    fn summary_has_one_line_per_turn() {
        let mut second = record(2);
        second.result = Some(ExecutionResult::fault("spawn command", 0));
        let summary = summarize_turns(&[record(1), second]);
        assert_eq!(
            summary,
            "- turn 1: run `ls` -> no result\n- turn 2: run `ls` -> exit -1"
        );
    }

    #[test]
    fn clip_middle_respects_char_boundaries() {
        let text = "é".repeat(20);
        let clipped = clip_middle(&text, 9);
        assert!(clipped.contains("bytes omitted"));
        assert!(clip_middle("short", 9) == "short");
    }
}
