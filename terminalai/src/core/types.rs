//! Shared deterministic types for the orchestration loop.
//!
//! These types define stable contracts between the decision channel, the shell
//! executor and the loop. They carry no I/O and serialize to the same field
//! names the audit log and the decision request use.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of action a decision (and the turn it produces) represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Analysis,
    Mutation,
    Verification,
    Completion,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::Mutation => "mutation",
            Phase::Verification => "verification",
            Phase::Completion => "completion",
        }
    }

    /// Parse a phase name, case-insensitively. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "analysis" => Some(Phase::Analysis),
            "mutation" => Some(Phase::Mutation),
            "verification" => Some(Phase::Verification),
            "completion" => Some(Phase::Completion),
            _ => None,
        }
    }
}

/// Advisory risk metadata. Surfaced to logs only, never used for loop control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// How the loop resolves confirmation for destructive commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Ask the confirmation collaborator; decline when none is configured.
    #[default]
    Prompt,
    /// Approve destructive commands without asking.
    AllowUnsafe,
    /// Decline destructive commands without asking.
    Off,
}

impl SafetyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyMode::Prompt => "prompt",
            SafetyMode::AllowUnsafe => "allow_unsafe",
            SafetyMode::Off => "off",
        }
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "prompt" | "confirm" => Ok(SafetyMode::Prompt),
            "allow_unsafe" | "unsafe" => Ok(SafetyMode::AllowUnsafe),
            "off" => Ok(SafetyMode::Off),
            other => Err(format!(
                "unknown safety mode '{other}' (expected prompt, allow_unsafe or off)"
            )),
        }
    }
}

/// Structured answer from the decision channel for one turn.
///
/// Field names follow the wire schema (`askUser`, `userQuestion`, ...). Values are
/// immutable once returned by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub command: Option<String>,
    pub notes: Option<String>,
    pub complete: bool,
    pub ask_user: bool,
    pub user_question: Option<String>,
    pub phase: Phase,
    pub expected_outcome: Option<String>,
    pub verification_command: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

impl Decision {
    /// A decision that neither runs anything nor completes the goal.
    pub fn safe_failure(note: impl Into<String>) -> Self {
        Self {
            notes: Some(note.into()),
            ..Self::default()
        }
    }

    /// The command to run, when it contains anything besides whitespace.
    pub fn runnable_command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .filter(|command| !command.trim().is_empty())
    }

    /// The question for the user, when the decision asks one.
    pub fn question_for_user(&self) -> Option<&str> {
        if !self.ask_user {
            return None;
        }
        self.user_question
            .as_deref()
            .map(str::trim)
            .filter(|question| !question.is_empty())
    }
}

/// Normalized executor output for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub command: String,
    pub shell: String,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    /// False when no process ran (guardrail rejection, dry run, missing executable).
    pub executed: bool,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub elevation_requested: bool,
    pub elevated: bool,
    pub elevation_error: Option<String>,
}

impl ExecutionResult {
    /// Result for a command that never reached a process.
    pub fn not_run(command: &str, shell: &str, returncode: i32, stderr: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            shell: shell.to_string(),
            returncode,
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
            timed_out: false,
            executed: false,
            blocked: false,
            block_reason: None,
            elevation_requested: false,
            elevated: false,
            elevation_error: None,
        }
    }

    /// Result for a guardrail rejection (exit code 126).
    pub fn blocked(command: &str, shell: &str, reason: &str) -> Self {
        Self {
            blocked: true,
            block_reason: Some(reason.to_string()),
            ..Self::not_run(command, shell, 126, reason)
        }
    }

    /// Render the result the way turns present it to users and to the oracle.
    pub fn render(&self) -> String {
        let mut buf = format!(
            "returncode={}\nduration={:.4}s\n",
            self.returncode,
            self.duration.as_secs_f64()
        );
        if self.timed_out {
            buf.push_str("timed_out=true\n");
        }
        buf.push_str(&format!(
            "stdout:\n{}\nstderr:\n{}",
            self.stdout, self.stderr
        ));
        buf
    }
}

/// Classification of an execution for verification purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Success,
    FailedAssertion,
    EnvironmentError,
    BlockedByPolicy,
}

/// Derived verdict on an [`ExecutionResult`] with a short diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub diagnostic: String,
}

/// One recorded step of run history.
///
/// Turns are appended once and never mutated afterwards, except for the
/// continuation-prompt suffix on the final turn's hint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionTurn {
    pub input: String,
    pub command: String,
    pub output: String,
    pub next_action_hint: Option<String>,
    pub awaiting_user_feedback: bool,
    pub turn_complete: bool,
    pub subtask_complete: bool,
    pub overarching_goal_complete: bool,
    pub continuation_prompt_added: bool,
    pub phase: Phase,
    pub expected_outcome: Option<String>,
    pub verification_command: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

impl SessionTurn {
    pub fn new(input: &str, command: &str, output: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            command: command.to_string(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.next_action_hint = Some(hint.into());
        self
    }

    /// Copy phase metadata from the decision that produced this turn.
    pub fn with_decision_metadata(mut self, decision: &Decision) -> Self {
        self.phase = decision.phase;
        self.expected_outcome = decision.expected_outcome.clone();
        self.verification_command = decision.verification_command.clone();
        self.risk_level = decision.risk_level;
        self
    }
}
