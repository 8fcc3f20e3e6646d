//! Response normalization: one raw completion text in, one [`Action`] out.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{Action, MalformedKind, TurnError};

const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

static ACTION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ACTION_SCHEMA).expect("embedded action schema is JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded action schema compiles")
});

/// A response that could not be turned into an action. The raw text is kept for the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed response ({kind}): {detail}")]
pub struct MalformedResponse {
    pub kind: MalformedKind,
    pub detail: String,
    pub text: String,
}

impl MalformedResponse {
    fn new(kind: MalformedKind, detail: impl Into<String>, text: &str) -> Self {
        Self {
            kind,
            detail: detail.into(),
            text: text.to_string(),
        }
    }
}

impl From<MalformedResponse> for TurnError {
    fn from(err: MalformedResponse) -> Self {
        TurnError::MalformedResponse {
            malformed: err.kind,
            detail: err.detail,
        }
    }
}

/// Decode one action from `text`.
///
/// `truncated` is the completion service's length flag; partial text is never parsed.
/// A single pair of code fences around the payload is tolerated.
pub fn normalize_response(text: &str, truncated: bool) -> Result<Action, MalformedResponse> {
    if truncated {
        return Err(MalformedResponse::new(
            MalformedKind::Truncated,
            "response was cut off by the output length limit",
            text,
        ));
    }
    let payload = strip_fences(text);
    if payload.is_empty() {
        return Err(MalformedResponse::new(
            MalformedKind::InvalidJson,
            "response is empty",
            text,
        ));
    }
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| MalformedResponse::new(MalformedKind::InvalidJson, err.to_string(), text))?;
    let messages: Vec<String> = ACTION_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(MalformedResponse::new(
            MalformedKind::SchemaViolation,
            messages.join("; "),
            text,
        ));
    }
    serde_json::from_value(value)
        .map_err(|err| MalformedResponse::new(MalformedKind::SchemaViolation, err.to_string(), text))
}

/// Remove one opening fence line and one closing fence. Interior content is untouched.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") || trimmed.len() < 6 || !trimmed.ends_with("```") {
        return trimmed;
    }
    let Some(newline) = trimmed.find('\n') else {
        return trimmed;
    };
    let body = &trimmed[newline + 1..trimmed.len() - 3];
    body.trim()
}
