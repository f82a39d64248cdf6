//! The orchestration loop.
//!
//! One iteration per step, at most `max_steps` decision round-trips per run:
//! optional turn-progress gate, context assembly, decision request, then one
//! of three branches (ask the user, finish, or execute). Every branch that
//! produces user-visible output appends a [`SessionTurn`] and writes it to the
//! audit log. Nothing in here fails: transport problems arrive as safe
//! decisions and policy outcomes are recorded as turns.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{CompletionVerdict, Collaborators, TurnProgress};
use crate::core::budget::{StepBudget, exhausted_message};
use crate::core::classifier::classify_execution;
use crate::core::events::{ContextEvent, EventKind};
use crate::core::phase_gate::PhaseGate;
use crate::core::types::{Decision, ExecutionResult, SafetyMode, SessionTurn};
use crate::io::channel::DecisionChannel;
use crate::io::config::DEFAULT_CONTINUATION_PROMPT;
use crate::io::session_log::{SCHEMA_VERSION, SessionLog, TurnRecord};
use crate::io::shell::{CommandRequest, ShellAdapter};

/// Conventional exit code for a command the user declined to run.
pub const DECLINED_EXIT_CODE: i32 = 130;
pub const DECLINED_MESSAGE: &str = "User declined destructive command execution.";
pub const VERIFY_FIRST_HINT: &str = "Completion rejected: a mutation-phase command ran without a \
     verification-phase command after it. Run a verification command before declaring the goal complete.";
const COMPLETION_CONTINUE_FALLBACK: &str = "User asked to continue instead of ending.";
const DESTRUCTIVE_SUMMARY: &str = "Commands matching destructive patterns (recursive or forced \
     deletion, disk formatting, DROP/TRUNCATE TABLE, forced git history rewrites) need confirmation.";

/// Fixed configuration of one loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub safety_mode: SafetyMode,
    pub working_directory: Option<PathBuf>,
    pub command_timeout: Option<Duration>,
    pub dry_run: bool,
    pub confirm_before_complete: bool,
    /// Sentence appended once to the final turn on completion; `None` disables it.
    pub continuation_prompt: Option<String>,
    /// Model name recorded in the audit log.
    pub model: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            safety_mode: SafetyMode::Prompt,
            working_directory: None,
            command_timeout: None,
            dry_run: false,
            confirm_before_complete: false,
            continuation_prompt: Some(DEFAULT_CONTINUATION_PROMPT.to_string()),
            model: String::new(),
        }
    }
}

/// Reason a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The decision channel declared the goal complete.
    GoalComplete,
    /// The decision channel proposed nothing further without claiming completion.
    Finished,
    /// A question is pending and no answer was available.
    AwaitingUser,
    /// The turn-progress gate said stop.
    Aborted,
    StepBudgetExhausted { max_steps: u32 },
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub turns: Vec<SessionTurn>,
    pub events: Vec<ContextEvent>,
    pub stop: LoopStop,
    /// Decision round-trips performed.
    pub steps_taken: u32,
}

impl RunOutcome {
    pub fn goal_complete(&self) -> bool {
        self.stop == LoopStop::GoalComplete
    }
}

/// Accumulated state of one run.
#[derive(Default)]
struct RunState {
    turns: Vec<SessionTurn>,
    /// Turns as context events, stamped when the turn was recorded.
    turn_events: Vec<ContextEvent>,
    events: Vec<ContextEvent>,
    gate: PhaseGate,
}

/// Drives a goal through the decision channel and shell adapter.
pub struct AgentLoop<'a, C: DecisionChannel + ?Sized, S: ShellAdapter + ?Sized> {
    channel: &'a C,
    shell: &'a S,
    config: LoopConfig,
    collaborators: Collaborators<'a>,
    history: Vec<ContextEvent>,
    log: Option<SessionLog>,
}

impl<'a, C: DecisionChannel + ?Sized, S: ShellAdapter + ?Sized> AgentLoop<'a, C, S> {
    pub fn new(channel: &'a C, shell: &'a S, config: LoopConfig) -> Self {
        Self {
            channel,
            shell,
            config,
            collaborators: Collaborators::default(),
            history: Vec::new(),
            log: None,
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators<'a>) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Resume with turns from earlier runs as leading context.
    pub fn with_history(mut self, turns: &[SessionTurn]) -> Self {
        self.history = turns
            .iter()
            .cloned()
            .map(|turn| ContextEvent::new(EventKind::SessionTurn(turn)))
            .collect();
        self
    }

    pub fn with_session_log(mut self, log: SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    #[instrument(skip_all, fields(max_steps = self.config.max_steps, shell = self.shell.name()))]
    pub fn run(&self, goal: &str) -> RunOutcome {
        let max_steps = self.config.max_steps;
        let mut state = RunState::default();
        state.events.push(self.runtime_context_event());
        let safety_policy = self.safety_policy_event();

        let mut steps_taken = 0u32;
        let mut stop = None;
        while steps_taken < max_steps {
            let step = steps_taken + 1;

            if let Some(progress) = self.collaborators.turn_progress {
                match progress.request_turn_progress(step, max_steps) {
                    TurnProgress::Stop => {
                        info!(step, "run stopped at turn-progress gate");
                        stop = Some(LoopStop::Aborted);
                        break;
                    }
                    TurnProgress::ProceedWith(instruction) if !instruction.trim().is_empty() => {
                        push_event(
                            &mut state.events,
                            EventKind::UserTurnInstruction {
                                instruction: instruction.trim().to_string(),
                            },
                        );
                    }
                    TurnProgress::ProceedWith(_) | TurnProgress::Proceed => {}
                }
            }

            let context = self.assemble_context(&state, step, &safety_policy);
            let decision = self.channel.next_decision(goal, &context);
            steps_taken = step;
            debug!(step, phase = decision.phase.as_str(), "decision received");

            if let Some(question) = decision.question_for_user() {
                if let Some(stopped) = self.ask_user(goal, step, &decision, question, &mut state) {
                    stop = Some(stopped);
                    break;
                }
                continue;
            }

            match decision.runnable_command() {
                Some(command) if !decision.complete => {
                    self.execute(goal, step, &decision, command, &mut state);
                }
                _ => {
                    if let Some(stopped) = self.finish(goal, step, &decision, &mut state) {
                        stop = Some(stopped);
                        break;
                    }
                }
            }
        }

        let stop = match stop {
            Some(stop) => stop,
            None => {
                warn!(max_steps, "step budget exhausted");
                push_event(&mut state.events, EventKind::StepBudgetExhausted { max_steps });
                let message = exhausted_message(max_steps);
                let turn = SessionTurn::new(goal, "", message.clone()).with_hint(message);
                self.record_turn(&mut state, turn, steps_taken, None, false);
                LoopStop::StepBudgetExhausted { max_steps }
            }
        };

        if stop == LoopStop::GoalComplete
            && let Some(prompt) = self.config.continuation_prompt.as_deref()
        {
            push_event(
                &mut state.events,
                EventKind::ContinuationPrompt {
                    prompt: prompt.to_string(),
                },
            );
            append_continuation_prompt(&mut state.turns, prompt);
        }

        info!(steps_taken, stop = ?stop, turns = state.turns.len(), "run finished");
        RunOutcome {
            turns: state.turns,
            events: state.events,
            stop,
            steps_taken,
        }
    }

    /// History, this run's turns, events, then the budget and safety snapshots.
    fn assemble_context(
        &self,
        state: &RunState,
        step: u32,
        safety_policy: &ContextEvent,
    ) -> Vec<ContextEvent> {
        let budget = StepBudget::new(step, self.config.max_steps);
        self.history
            .iter()
            .chain(&state.turn_events)
            .chain(&state.events)
            .cloned()
            .chain([ContextEvent::new(budget.event()), safety_policy.clone()])
            .collect()
    }

    fn ask_user(
        &self,
        goal: &str,
        step: u32,
        decision: &Decision,
        question: &str,
        state: &mut RunState,
    ) -> Option<LoopStop> {
        let mut turn = SessionTurn::new(goal, "", "")
            .with_hint(question)
            .with_decision_metadata(decision);
        turn.awaiting_user_feedback = true;
        self.record_turn(state, turn, step, None, decision.complete);

        let Some(collector) = self.collaborators.request_feedback else {
            info!(step, "question pending without a feedback collector");
            return Some(LoopStop::AwaitingUser);
        };
        let response = collector.request_feedback(question);
        let response = response.trim();
        if response.is_empty() {
            info!(step, "empty feedback; stopping");
            return Some(LoopStop::AwaitingUser);
        }
        push_event(
            &mut state.events,
            EventKind::UserFeedback {
                question: question.to_string(),
                response: response.to_string(),
            },
        );
        None
    }

    /// Completion or no command. Returns `None` when the loop must continue.
    fn finish(
        &self,
        goal: &str,
        step: u32,
        decision: &Decision,
        state: &mut RunState,
    ) -> Option<LoopStop> {
        if decision.complete && state.gate.blocks_completion() {
            let pending = state.gate.pending_mutation().map(str::to_string);
            warn!(step, pending = ?pending, "completion rejected: unverified mutation");
            push_event(
                &mut state.events,
                EventKind::PhaseTransitionBlocked {
                    reason: "mutation not followed by verification".to_string(),
                    pending_mutation_command: pending,
                },
            );
            let turn = SessionTurn::new(goal, "", "")
                .with_hint(VERIFY_FIRST_HINT)
                .with_decision_metadata(decision);
            self.record_turn(state, turn, step, None, decision.complete);
            return None;
        }

        if self.config.confirm_before_complete
            && let Some(confirm) = self.collaborators.confirm_completion
            && let CompletionVerdict::Continue(feedback) =
                confirm.confirm_completion(decision.notes.as_deref())
        {
            let feedback = feedback
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| COMPLETION_CONTINUE_FALLBACK.to_string());
            push_event(
                &mut state.events,
                EventKind::UserFeedback {
                    question: "Is the task complete?".to_string(),
                    response: feedback.clone(),
                },
            );
            let turn = SessionTurn::new(goal, "", "")
                .with_hint(format!("User declined completion: {feedback}"))
                .with_decision_metadata(decision);
            self.record_turn(state, turn, step, None, decision.complete);
            return None;
        }

        let hint = decision.notes.clone().unwrap_or_else(|| {
            if decision.complete {
                "Goal complete.".to_string()
            } else {
                "No command proposed.".to_string()
            }
        });
        let mut turn = SessionTurn::new(goal, "", "")
            .with_hint(hint)
            .with_decision_metadata(decision);
        turn.turn_complete = true;
        turn.subtask_complete = decision.complete;
        turn.overarching_goal_complete = decision.complete;
        if decision.complete {
            push_event(
                &mut state.events,
                EventKind::GoalCompletion {
                    notes: decision.notes.clone(),
                },
            );
        }
        self.record_turn(state, turn, step, None, decision.complete);

        Some(if decision.complete {
            LoopStop::GoalComplete
        } else {
            LoopStop::Finished
        })
    }

    fn execute(
        &self,
        goal: &str,
        step: u32,
        decision: &Decision,
        command: &str,
        state: &mut RunState,
    ) {
        let destructive = self.shell.is_destructive(command);
        let confirmed = destructive && !self.config.dry_run && self.resolve_confirmation(command);

        if destructive && !confirmed && !self.config.dry_run {
            info!(step, "destructive command declined");
            push_event(
                &mut state.events,
                EventKind::CommandDeclined {
                    command: command.to_string(),
                    reason: DECLINED_MESSAGE.to_string(),
                },
            );
            let result = ExecutionResult::not_run(
                command,
                self.shell.name(),
                DECLINED_EXIT_CODE,
                DECLINED_MESSAGE,
            );
            let mut turn = SessionTurn::new(goal, command, result.render())
                .with_decision_metadata(decision);
            turn.next_action_hint = decision.notes.clone();
            turn.turn_complete = true;
            self.record_turn(state, turn, step, Some(&result), decision.complete);
            return;
        }

        let request = CommandRequest::new(command)
            .cwd(self.config.working_directory.as_deref())
            .timeout(self.config.command_timeout)
            .dry_run(self.config.dry_run)
            .confirmed(confirmed);
        let result = self.shell.execute(&request);
        let verification = classify_execution(&result);

        if result.blocked {
            push_event(
                &mut state.events,
                EventKind::CommandBlocked {
                    command: command.to_string(),
                    reason: result.block_reason.clone().unwrap_or_default(),
                },
            );
        } else {
            state.gate.record_execution(decision.phase, command);
            push_event(
                &mut state.events,
                EventKind::CommandExecuted {
                    command: command.to_string(),
                    phase: decision.phase,
                    returncode: result.returncode,
                    timed_out: result.timed_out,
                    verification,
                },
            );
        }

        let mut turn =
            SessionTurn::new(goal, command, result.render()).with_decision_metadata(decision);
        turn.next_action_hint = decision.notes.clone();
        turn.turn_complete = true;
        self.record_turn(state, turn, step, Some(&result), decision.complete);
    }

    fn resolve_confirmation(&self, command: &str) -> bool {
        match self.config.safety_mode {
            SafetyMode::AllowUnsafe => true,
            SafetyMode::Off => false,
            SafetyMode::Prompt => self
                .collaborators
                .confirm_command
                .is_some_and(|confirm| confirm.confirm_command(command)),
        }
    }

    fn record_turn(
        &self,
        state: &mut RunState,
        turn: SessionTurn,
        step: u32,
        result: Option<&ExecutionResult>,
        decision_complete: bool,
    ) {
        if let Some(log) = &self.log {
            let record = TurnRecord {
                schema_version: SCHEMA_VERSION,
                timestamp: Utc::now(),
                goal: &turn.input,
                model: &self.config.model,
                shell: self.shell.name(),
                working_directory: self.config.working_directory.as_deref(),
                step,
                turn: &turn,
                returncode: result.map(|r| r.returncode),
                duration_seconds: result.map(|r| r.duration.as_secs_f64()),
                decision_complete,
            };
            if let Err(err) = log.append(&record) {
                warn!(err = %format!("{err:#}"), "failed to append audit log");
            }
        }
        state
            .turn_events
            .push(ContextEvent::new(EventKind::SessionTurn(turn.clone())));
        state.turns.push(turn);
    }

    fn runtime_context_event(&self) -> ContextEvent {
        ContextEvent::new(EventKind::RuntimeContext {
            shell: self.shell.name().to_string(),
            platform: std::env::consts::OS.to_string(),
            starting_working_directory: self
                .config
                .working_directory
                .as_ref()
                .map(|dir| dir.display().to_string()),
            safety_mode: self.config.safety_mode,
            dry_run: self.config.dry_run,
        })
    }

    fn safety_policy_event(&self) -> ContextEvent {
        let guidance = match self.config.safety_mode {
            SafetyMode::Prompt => "The user is asked before each destructive command runs.",
            SafetyMode::AllowUnsafe => "Destructive commands run without asking.",
            SafetyMode::Off => "Destructive commands are always declined; find a non-destructive path.",
        };
        ContextEvent::new(EventKind::SafetyPolicy {
            safety_mode: self.config.safety_mode,
            destructive_commands: DESTRUCTIVE_SUMMARY.to_string(),
            guidance: guidance.to_string(),
        })
    }
}

fn push_event(events: &mut Vec<ContextEvent>, kind: EventKind) {
    events.push(ContextEvent::new(kind));
}

/// Append `prompt` to the final turn's hint, once.
///
/// Returns whether the hint changed.
pub fn append_continuation_prompt(turns: &mut [SessionTurn], prompt: &str) -> bool {
    let Some(last) = turns.last_mut() else {
        return false;
    };
    let already = last.continuation_prompt_added
        || last
            .next_action_hint
            .as_deref()
            .is_some_and(|hint| hint.contains(prompt));
    if already {
        last.continuation_prompt_added = true;
        return false;
    }
    last.next_action_hint = Some(match last.next_action_hint.take() {
        Some(hint) if !hint.trim().is_empty() => format!("{hint}\n\n{prompt}"),
        _ => prompt.to_string(),
    });
    last.continuation_prompt_added = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_prompt_is_appended_once() {
        let mut turns = vec![SessionTurn::new("goal", "", "").with_hint("All done.")];
        assert!(append_continuation_prompt(&mut turns, DEFAULT_CONTINUATION_PROMPT));
        assert!(!append_continuation_prompt(&mut turns, DEFAULT_CONTINUATION_PROMPT));
        assert!(!append_continuation_prompt(&mut turns, DEFAULT_CONTINUATION_PROMPT));

        let hint = turns[0].next_action_hint.as_deref().expect("hint");
        assert_eq!(hint.matches(DEFAULT_CONTINUATION_PROMPT).count(), 1);
        assert!(hint.starts_with("All done."));
        assert!(turns[0].continuation_prompt_added);
    }

    #[test]
    fn continuation_prompt_on_empty_hint_and_no_turns() {
        let mut turns = vec![SessionTurn::new("goal", "", "")];
        assert!(append_continuation_prompt(&mut turns, "More?"));
        assert_eq!(turns[0].next_action_hint.as_deref(), Some("More?"));

        assert!(!append_continuation_prompt(&mut [], "More?"));
    }
}
