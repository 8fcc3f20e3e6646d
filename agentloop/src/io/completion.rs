//! Completion service seam.
//!
//! The orchestrator talks to the model through [`CompletionClient`]. The shipped
//! [`CommandCompletionClient`] delegates the network protocol to an external command:
//! the request JSON goes to its stdin and a response JSON is read from its stdout.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{FinishReason, TokenUsage};
use crate::io::process::{CancelToken, run_command_with_timeout};

/// Upper bound on a completion command's stdout.
const RESPONSE_LIMIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip)]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// The service could not be reached after the client's retry policy.
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
    #[error("completion cancelled")]
    Cancelled,
}

pub trait CompletionClient {
    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse, CompletionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

/// Completion client backed by an external command line.
#[derive(Debug, Clone)]
pub struct CommandCompletionClient {
    program: String,
    args: Vec<String>,
    retry: RetryPolicy,
}

impl CommandCompletionClient {
    /// Split `command_line` with shell quoting rules.
    pub fn new(command_line: &str, retry: RetryPolicy) -> Result<Self> {
        let mut words = shell_words::split(command_line)
            .with_context(|| format!("parse completion command {command_line:?}"))?;
        if words.is_empty() {
            bail!("completion command is empty");
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            retry,
        })
    }

    fn attempt(&self, request: &CompletionRequest, cancel: &CancelToken) -> Result<CompletionResponse> {
        let payload = serde_json::to_vec(request).context("serialize completion request")?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            request.timeout,
            RESPONSE_LIMIT_BYTES,
            cancel,
        )?;
        if output.cancelled {
            bail!("cancelled");
        }
        if output.timed_out {
            bail!("timed out after {} s", request.timeout.as_secs());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "completion command exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }
        if output.stdout_truncated > 0 {
            bail!("completion response exceeded {RESPONSE_LIMIT_BYTES} bytes");
        }
        parse_response(&output.stdout)
    }
}

impl CompletionClient for CommandCompletionClient {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse, CompletionError> {
        let mut last_error = String::new();
        for attempt in 0..=self.retry.max_retries {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            if attempt > 0 {
                let delay = self.retry.backoff * attempt;
                info!(attempt, delay_ms = delay.as_millis() as u64, "retrying completion");
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(CompletionError::Cancelled);
                }
            }
            match self.attempt(request, cancel) {
                Ok(response) => {
                    debug!(
                        finish_reason = ?response.finish_reason,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "completion received"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        return Err(CompletionError::Cancelled);
                    }
                    warn!(attempt, err = %format!("{err:#}"), "completion attempt failed");
                    last_error = format!("{err:#}");
                }
            }
        }
        Err(CompletionError::Unavailable(last_error))
    }
}

/// Returns false if cancelled while waiting.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let until = Instant::now() + delay;
    while Instant::now() < until {
        if cancel.is_cancelled() {
            return false;
        }
        thread::sleep(Duration::from_millis(20).min(until.saturating_duration_since(Instant::now())));
    }
    !cancel.is_cancelled()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Simple(CompletionResponse),
    Chat(ChatResponse),
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: FinishReason,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Accepts `{"text", "finish_reason", "usage"}` or a chat-completions style body.
pub fn parse_response(stdout: &[u8]) -> Result<CompletionResponse> {
    let wire: WireResponse =
        serde_json::from_slice(stdout).context("parse completion response json")?;
    match wire {
        WireResponse::Simple(response) => Ok(response),
        WireResponse::Chat(chat) => {
            let choice = chat
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("completion response has no choices"))?;
            Ok(CompletionResponse {
                text: choice.message.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                usage: chat.usage,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request(timeout: Duration) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: 0.7,
            max_tokens: 100,
            timeout,
        }
    }

    fn no_backoff(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn parses_simple_and_chat_bodies() {
        let simple = parse_response(
            br#"{"text":"{}","finish_reason":"length","usage":{"prompt_tokens":3,"completion_tokens":4}}"#,
        )
        .expect("simple");
        assert_eq!(simple.finish_reason, FinishReason::Length);
        assert_eq!(simple.usage.total(), 7);

        let chat = parse_response(
            br#"{"choices":[{"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
        )
        .expect("chat");
        assert_eq!(chat.text, "ok");
        assert_eq!(chat.finish_reason, FinishReason::Stop);
        assert_eq!(chat.usage.completion_tokens, 2);

        assert!(parse_response(br#"{"choices":[]}"#).is_err());
        assert!(parse_response(b"not json").is_err());
    }

    /// Verifies the request JSON reaches the command's stdin.
    #[test]
    fn command_client_round_trips_through_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let captured = temp.path().join("request.json");
        let script = format!(
            "cat > '{}'; printf '%s' '{{\"text\":\"hello\"}}'",
            captured.display()
        );
        let client = CommandCompletionClient::new(
            &format!("/bin/sh -c {}", shell_words::quote(&script)),
            no_backoff(0),
        )
        .expect("client");
        let response = client
            .complete(&request(Duration::from_secs(5)), &CancelToken::new())
            .expect("response");
        assert_eq!(response.text, "hello");
        let sent: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&captured).expect("read")).expect("json");
        assert_eq!(sent["model"], "gpt-4o-mini");
        assert_eq!(sent["messages"][1]["role"], "user");
        assert!(sent.get("timeout").is_none());
    }

    #[test]
    fn retries_then_reports_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let counter = temp.path().join("attempts");
        let script = format!("echo x >> '{}'; exit 1", counter.display());
        let client = CommandCompletionClient::new(
            &format!("/bin/sh -c {}", shell_words::quote(&script)),
            no_backoff(2),
        )
        .expect("client");
        let err = client
            .complete(&request(Duration::from_secs(5)), &CancelToken::new())
            .expect_err("unavailable");
        assert!(matches!(err, CompletionError::Unavailable(_)));
        let attempts = fs::read_to_string(&counter).expect("counter").lines().count();
        assert_eq!(attempts, 3);
    }

    #[test]
    fn cancelled_before_call() {
        let client = CommandCompletionClient::new("/bin/true", no_backoff(3)).expect("client");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = client
            .complete(&request(Duration::from_secs(5)), &cancel)
            .expect_err("cancelled");
        assert_eq!(err, CompletionError::Cancelled);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandCompletionClient::new("  ", RetryPolicy::default()).is_err());
    }
}
