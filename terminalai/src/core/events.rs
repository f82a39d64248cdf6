//! Typed context events replayed into every decision request.
//!
//! Events live only for the duration of one run. They serialize as flat JSON
//! objects tagged by `type`, with an RFC 3339 `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{Phase, SafetyMode, SessionTurn, VerificationResult};

/// A timestamped fact about the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ContextEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Machine facts for the run: which shell, where, under which safety mode.
    RuntimeContext {
        shell: String,
        platform: String,
        starting_working_directory: Option<String>,
        safety_mode: SafetyMode,
        dry_run: bool,
    },
    /// A recorded turn from this run or a resumed one.
    SessionTurn(SessionTurn),
    UserFeedback {
        question: String,
        response: String,
    },
    CommandExecuted {
        command: String,
        phase: Phase,
        returncode: i32,
        timed_out: bool,
        verification: VerificationResult,
    },
    CommandBlocked {
        command: String,
        reason: String,
    },
    CommandDeclined {
        command: String,
        reason: String,
    },
    StepBudget {
        current_step: u32,
        max_steps: u32,
        steps_remaining: u32,
    },
    SafetyPolicy {
        safety_mode: SafetyMode,
        destructive_commands: String,
        guidance: String,
    },
    PhaseTransitionBlocked {
        reason: String,
        pending_mutation_command: Option<String>,
    },
    GoalCompletion {
        notes: Option<String>,
    },
    StepBudgetExhausted {
        max_steps: u32,
    },
    UserTurnInstruction {
        instruction: String,
    },
    ContinuationPrompt {
        prompt: String,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::RuntimeContext { .. } => "runtime_context",
            EventKind::SessionTurn(_) => "session_turn",
            EventKind::UserFeedback { .. } => "user_feedback",
            EventKind::CommandExecuted { .. } => "command_executed",
            EventKind::CommandBlocked { .. } => "command_blocked",
            EventKind::CommandDeclined { .. } => "command_declined",
            EventKind::StepBudget { .. } => "step_budget",
            EventKind::SafetyPolicy { .. } => "safety_policy",
            EventKind::PhaseTransitionBlocked { .. } => "phase_transition_blocked",
            EventKind::GoalCompletion { .. } => "goal_completion",
            EventKind::StepBudgetExhausted { .. } => "step_budget_exhausted",
            EventKind::UserTurnInstruction { .. } => "user_turn_instruction",
            EventKind::ContinuationPrompt { .. } => "continuation_prompt",
        }
    }
}

/// Shell name from the most recent `runtime_context` event, if any.
pub fn latest_runtime_shell(events: &[ContextEvent]) -> Option<&str> {
    events.iter().rev().find_map(|event| match &event.kind {
        EventKind::RuntimeContext { shell, .. } => Some(shell.as_str()),
        _ => None,
    })
}
