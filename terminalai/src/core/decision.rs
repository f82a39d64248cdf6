//! Untrusted decision payload handling.
//!
//! Everything the decision oracle returns is treated as untrusted JSON. This
//! module owns the single coercion routine that turns an arbitrary JSON object
//! into a [`Decision`], plus the failure taxonomy that maps transport and parse
//! problems onto a safe decision (`command = null`, `complete = false`).

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::{Decision, Phase, RiskLevel};

/// Longest response-body excerpt carried into a failure note.
pub const BODY_EXCERPT_CHARS: usize = 300;

/// Why a decision request could not produce a usable decision.
///
/// The `Display` text is the note surfaced to the loop (and the user) as the
/// turn hint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelFailure {
    #[error("Decision request failed: network error ({0}).")]
    Transport(String),
    #[error("Decision request failed with HTTP status {status}: {excerpt}")]
    Status { status: u16, excerpt: String },
    #[error("Decision request timed out after {elapsed_secs:.1} seconds.")]
    Timeout { elapsed_secs: f64 },
    #[error("Decision response parsing error: {0}")]
    MalformedEnvelope(String),
    #[error("Decision output parsing error: {0}")]
    MalformedDecision(String),
    #[error("No structured output returned")]
    MissingOutput,
    #[error("Decision request could not be built: {0}")]
    Request(String),
}

impl ChannelFailure {
    pub fn status(status: u16, body: &str) -> Self {
        ChannelFailure::Status {
            status,
            excerpt: excerpt(body, BODY_EXCERPT_CHARS),
        }
    }

    /// The safe decision the loop receives in place of a real one.
    pub fn into_decision(self) -> Decision {
        Decision::safe_failure(self.to_string())
    }
}

/// Decode an HTTP response into the embedded decision object.
///
/// Checks status, parses the envelope, locates the first `output_text` block and
/// parses its text as a JSON object. Field-level checks are left to
/// [`coerce_decision`].
pub fn decode_response(status: u16, body: &str) -> Result<Map<String, Value>, ChannelFailure> {
    if !(200..300).contains(&status) {
        return Err(ChannelFailure::status(status, body));
    }
    let envelope: Value = serde_json::from_str(body)
        .map_err(|err| ChannelFailure::MalformedEnvelope(err.to_string()))?;
    let text = extract_output_text(&envelope).ok_or(ChannelFailure::MissingOutput)?;
    parse_decision_object(text)
}

/// Find the first non-empty `output_text` content block in a response envelope.
pub fn extract_output_text(envelope: &Value) -> Option<&str> {
    envelope
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content")?.as_array())
        .flatten()
        .find_map(|block| {
            if block.get("type")?.as_str()? != "output_text" {
                return None;
            }
            block.get("text")?.as_str().filter(|text| !text.is_empty())
        })
}

/// Parse embedded structured output, requiring a top-level JSON object.
pub fn parse_decision_object(text: &str) -> Result<Map<String, Value>, ChannelFailure> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| ChannelFailure::MalformedDecision(err.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ChannelFailure::MalformedDecision(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Coerce an untrusted decision object into a [`Decision`].
///
/// Never fails: ill-typed fields fall back to safe defaults. A non-string
/// `notes` value is replaced with a diagnostic and forces `complete = false`.
pub fn coerce_decision(raw: &Map<String, Value>) -> Decision {
    let (notes, notes_invalid) = match raw.get("notes") {
        Some(Value::String(notes)) => (Some(notes.clone()), false),
        None | Some(Value::Null) => (None, false),
        Some(other) => (
            Some(format!(
                "Decision notes had unexpected type {}; ignoring them.",
                json_type_name(other)
            )),
            true,
        ),
    };

    Decision {
        command: string_field(raw, "command"),
        notes,
        complete: !notes_invalid && raw.get("complete") == Some(&Value::Bool(true)),
        ask_user: raw.get("askUser") == Some(&Value::Bool(true)),
        user_question: string_field(raw, "userQuestion"),
        phase: raw
            .get("phase")
            .and_then(Value::as_str)
            .and_then(Phase::parse)
            .unwrap_or_default(),
        expected_outcome: string_field(raw, "expectedOutcome"),
        verification_command: string_field(raw, "verificationCommand"),
        risk_level: raw
            .get("riskLevel")
            .and_then(Value::as_str)
            .and_then(RiskLevel::parse),
    }
}

fn string_field(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn excerpt(body: &str, limit: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
