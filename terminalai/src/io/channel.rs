//! HTTP decision channel.
//!
//! One blocking round-trip per turn: render the system instructions, window the
//! context events into the character budget, post a structured-output request
//! and coerce whatever comes back into a [`Decision`]. Every failure becomes a
//! safe decision (`command = null`, `complete = false`) whose notes name the
//! failure; nothing here returns an error to the loop.

use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{ChannelFailure, coerce_decision, decode_response};
use crate::core::events::{ContextEvent, latest_runtime_shell};
use crate::core::types::{Decision, SafetyMode};
use crate::core::window::{clip_turn_outputs, turn_output_chars, window_events};
use crate::io::prompt::{SystemPromptInputs, render_system_prompt};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/responses";
pub const RESPONSE_FORMAT_NAME: &str = "terminal_step";

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

static BASE_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(DECISION_SCHEMA).expect("decision schema should be valid json")
});

/// Source of the next decision for a goal.
pub trait DecisionChannel {
    /// Request the next decision. Failures come back as safe decisions.
    fn next_decision(&self, goal: &str, context: &[ContextEvent]) -> Decision;
}

/// Fixed configuration of an [`HttpDecisionChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub timeout: Duration,
    /// Character budget for the serialized context; `<= 0` sends an empty context.
    pub context_char_budget: i64,
    /// Declare `askUser`/`userQuestion` in the response schema.
    pub allow_user_questions: bool,
    pub safety_mode: SafetyMode,
    pub extra_instructions: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: "gpt-5.2".to_string(),
            reasoning_effort: None,
            timeout: Duration::from_secs(60),
            context_char_budget: 24_000,
            allow_user_questions: false,
            safety_mode: SafetyMode::default(),
            extra_instructions: None,
        }
    }
}

/// Response schema for a decision, optionally declaring the ask-user fields.
pub fn response_schema(allow_user_questions: bool) -> Value {
    let mut schema = BASE_SCHEMA.clone();
    if allow_user_questions {
        if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            properties.insert("askUser".to_string(), json!({"type": "boolean"}));
            properties.insert("userQuestion".to_string(), json!({"type": ["string", "null"]}));
        }
        if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
            required.push(json!("askUser"));
            required.push(json!("userQuestion"));
        }
    }
    schema
}

/// Decision channel speaking the structured-output responses API over HTTPS.
pub struct HttpDecisionChannel {
    config: ChannelConfig,
    client: reqwest::blocking::Client,
    schema: Value,
    validator: Validator,
}

impl fmt::Debug for HttpDecisionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDecisionChannel")
            .field("api_url", &self.config.api_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl HttpDecisionChannel {
    pub fn new(config: ChannelConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build http client")?;
        let schema = response_schema(config.allow_user_questions);
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile decision schema")?;
        Ok(Self {
            config,
            client,
            schema,
            validator,
        })
    }

    /// Full request body for one decision.
    pub fn build_payload(&self, goal: &str, context: &[ContextEvent]) -> Result<Value> {
        let system = render_system_prompt(&SystemPromptInputs {
            shell: latest_runtime_shell(context),
            safety_mode: self.config.safety_mode,
            allow_user_questions: self.config.allow_user_questions,
            extra_instructions: self.config.extra_instructions.as_deref(),
        })?;
        let budget = self.config.context_char_budget;
        let clipped = clip_turn_outputs(context, turn_output_chars(budget));
        let window = window_events(&clipped, budget);
        if window.len() < context.len() {
            debug!(
                dropped = context.len() - window.len(),
                kept = window.len(),
                "context windowed"
            );
        }
        let user = serde_json::to_string(&json!({ "goal": goal, "context": window }))
            .context("serialize user message")?;

        let mut payload = json!({
            "model": self.config.model,
            "input": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": RESPONSE_FORMAT_NAME,
                    "strict": true,
                    "schema": self.schema,
                }
            },
        });
        if let Some(effort) = self
            .config
            .reasoning_effort
            .as_deref()
            .filter(|effort| !effort.trim().is_empty())
        {
            payload["reasoning"] = json!({ "effort": effort });
        }
        Ok(payload)
    }

    fn request_decision(
        &self,
        goal: &str,
        context: &[ContextEvent],
    ) -> Result<Decision, ChannelFailure> {
        let payload = self
            .build_payload(goal, context)
            .map_err(|err| ChannelFailure::Request(format!("{err:#}")))?;

        let started = Instant::now();
        let mut request = self.client.post(&self.config.api_url).json(&payload);
        if let Some(key) = self.config.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .map_err(|err| transport_failure(&err, started))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| transport_failure(&err, started))?;
        debug!(
            status,
            elapsed_secs = started.elapsed().as_secs_f64(),
            body_len = body.len(),
            "decision response received"
        );

        let raw = decode_response(status, &body)?;
        self.log_schema_violations(&raw);
        Ok(self.finish(coerce_decision(&raw)))
    }

    fn log_schema_violations(&self, raw: &Map<String, Value>) {
        let instance = Value::Object(raw.clone());
        let violations: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            warn!(
                count = violations.len(),
                violations = %violations.join("; "),
                "decision violates response schema; coercing"
            );
        }
    }

    /// Drop ask-user fields the schema never offered.
    fn finish(&self, mut decision: Decision) -> Decision {
        if !self.config.allow_user_questions {
            decision.ask_user = false;
            decision.user_question = None;
        }
        decision
    }
}

fn transport_failure(err: &reqwest::Error, started: Instant) -> ChannelFailure {
    if err.is_timeout() {
        ChannelFailure::Timeout {
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    } else {
        ChannelFailure::Transport(error_chain(err))
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl DecisionChannel for HttpDecisionChannel {
    #[instrument(skip_all, fields(model = %self.config.model, events = context.len()))]
    fn next_decision(&self, goal: &str, context: &[ContextEvent]) -> Decision {
        match self.request_decision(goal, context) {
            Ok(decision) => {
                info!(
                    has_command = decision.runnable_command().is_some(),
                    complete = decision.complete,
                    ask_user = decision.ask_user,
                    phase = decision.phase.as_str(),
                    "decision received"
                );
                decision
            }
            Err(failure) => {
                warn!(%failure, "decision request failed");
                failure.into_decision()
            }
        }
    }
}
