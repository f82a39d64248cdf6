use std::fs;

use terminalai::agent_loop::{
    AgentLoop, DECLINED_EXIT_CODE, DECLINED_MESSAGE, LoopConfig, LoopStop, VERIFY_FIRST_HINT,
};
use terminalai::collaborators::{Collaborators, CompletionVerdict, TurnProgress};
use terminalai::core::events::{ContextEvent, EventKind};
use terminalai::core::types::{Decision, ExecutionResult, Phase, SafetyMode, VerificationStatus};
use terminalai::io::config::DEFAULT_CONTINUATION_PROMPT;
use terminalai::test_support::{
    ScriptedChannel, ScriptedShell, ask, complete, failure, run, temp_session_log,
};

fn config(max_steps: u32) -> LoopConfig {
    LoopConfig {
        max_steps,
        model: "test-model".to_string(),
        ..LoopConfig::default()
    }
}

fn event_types(events: &[ContextEvent]) -> Vec<&'static str> {
    events.iter().map(ContextEvent::type_name).collect()
}

#[test]
fn executes_then_completes_and_logs_one_command_line() {
    let channel = ScriptedChannel::new([run("echo hi", Phase::Analysis), complete("Listed.")]);
    let shell = ScriptedShell::new();
    let (dir, log) = temp_session_log();

    let outcome = AgentLoop::new(&channel, &shell, config(5))
        .with_session_log(log.clone())
        .run("list files");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    assert_eq!(outcome.turns.len(), 2);
    assert_eq!(outcome.turns[0].command, "echo hi");
    assert!(outcome.turns[0].output.contains("returncode=0"));
    assert!(outcome.turns[1].overarching_goal_complete);
    assert_eq!(shell.commands(), vec!["echo hi"]);

    let files: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .expect("log dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(files.len(), 1);
    let contents = fs::read_to_string(&files[0]).expect("read log");
    let matching: Vec<_> = contents
        .lines()
        .filter(|line| line.contains(r#""command":"echo hi""#))
        .collect();
    assert_eq!(matching.len(), 1);
    assert!(matching[0].contains(r#""schema_version":1"#));
    assert!(matching[0].contains(r#""goal":"list files""#));
}

#[test]
fn question_without_collector_stops_after_one_turn() {
    let channel = ScriptedChannel::new([ask("Which environment?"), run("echo never", Phase::Analysis)]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(&channel, &shell, config(5)).run("deploy");

    assert_eq!(outcome.stop, LoopStop::AwaitingUser);
    assert_eq!(outcome.turns.len(), 1);
    assert!(outcome.turns[0].awaiting_user_feedback);
    assert_eq!(
        outcome.turns[0].next_action_hint.as_deref(),
        Some("Which environment?")
    );
    assert!(shell.commands().is_empty());
    assert_eq!(channel.calls(), 1);
}

#[test]
fn answered_question_is_fed_back_as_context() {
    let channel = ScriptedChannel::new([ask("Which environment?"), complete("Done.")]);
    let shell = ScriptedShell::new();
    let answer = |_question: &str| "staging".to_string();

    let outcome = AgentLoop::new(&channel, &shell, config(5))
        .with_collaborators(Collaborators::default().with_request_feedback(&answer))
        .run("deploy");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    let second = &channel.contexts()[1];
    assert!(second.iter().any(|event| matches!(
        &event.kind,
        EventKind::UserFeedback { response, .. } if response == "staging"
    )));
}

#[test]
fn declined_destructive_command_never_executes() {
    let channel = ScriptedChannel::new([run("rm -rf ./tmp", Phase::Mutation)]);
    let shell = ScriptedShell::new();
    let decline = |_command: &str| false;

    let outcome = AgentLoop::new(&channel, &shell, config(1))
        .with_collaborators(Collaborators::default().with_confirm_command(&decline))
        .run("clean up");

    assert!(shell.commands().is_empty());
    let declined = &outcome.turns[0];
    assert_eq!(declined.command, "rm -rf ./tmp");
    assert!(declined.output.contains(&format!("returncode={DECLINED_EXIT_CODE}")));
    assert!(declined.output.contains(DECLINED_MESSAGE));
    assert!(event_types(&outcome.events).contains(&"command_declined"));
}

#[test]
fn safety_modes_resolve_confirmation_without_asking() {
    let approve = |_command: &str| -> bool { panic!("collaborator must not be asked") };

    for (mode, executed) in [(SafetyMode::Off, false), (SafetyMode::AllowUnsafe, true)] {
        let channel = ScriptedChannel::new([run("rm -rf ./tmp", Phase::Mutation)]);
        let shell = ScriptedShell::new();
        AgentLoop::new(
            &channel,
            &shell,
            LoopConfig {
                safety_mode: mode,
                ..config(1)
            },
        )
        .with_collaborators(Collaborators::default().with_confirm_command(&approve))
        .run("clean up");

        let requests = shell.requests();
        assert_eq!(requests.len(), usize::from(executed), "mode {mode}");
        if executed {
            assert!(requests[0].confirmed);
        }
    }
}

#[test]
fn prompt_mode_without_confirmer_declines() {
    let channel = ScriptedChannel::new([run("git push --force origin main", Phase::Mutation)]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(&channel, &shell, config(1)).run("publish");

    assert!(shell.commands().is_empty());
    assert!(outcome.turns[0].output.contains(DECLINED_MESSAGE));
}

#[test]
fn dry_run_passes_destructive_commands_through_unconfirmed() {
    let channel = ScriptedChannel::new([run("rm -rf ./tmp", Phase::Mutation)]);
    let shell = ScriptedShell::new();

    AgentLoop::new(
        &channel,
        &shell,
        LoopConfig {
            dry_run: true,
            ..config(1)
        },
    )
    .run("clean up");

    let requests = shell.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].dry_run);
    assert!(!requests[0].confirmed);
}

#[test]
fn budget_exhaustion_adds_one_synthetic_turn() {
    let channel = ScriptedChannel::new([
        run("echo one", Phase::Analysis),
        run("echo two", Phase::Analysis),
    ]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(&channel, &shell, config(1)).run("never done");

    assert_eq!(outcome.stop, LoopStop::StepBudgetExhausted { max_steps: 1 });
    assert_eq!(outcome.turns.len(), 2);
    assert_eq!(outcome.steps_taken, 1);
    let last = outcome.turns[1].next_action_hint.as_deref().expect("hint");
    assert!(last.contains("Reached step 1/1."));
    assert_eq!(
        event_types(&outcome.events).last(),
        Some(&"step_budget_exhausted")
    );
}

#[test]
fn round_trips_never_exceed_the_budget() {
    for max_steps in 1..=6 {
        let script = (0..10).map(|i| run(&format!("echo {i}"), Phase::Analysis));
        let channel = ScriptedChannel::new(script);
        let shell = ScriptedShell::new();

        let outcome = AgentLoop::new(&channel, &shell, config(max_steps)).run("loop");

        assert_eq!(channel.calls(), max_steps as usize);
        assert!(outcome.turns.len() <= max_steps as usize + 1);
    }
}

#[test]
fn completion_after_unverified_mutation_is_rejected_once() {
    let channel = ScriptedChannel::new([
        run("sed -i 's/a/b/' app.cfg", Phase::Mutation),
        complete("Changed it."),
        run("grep b app.cfg", Phase::Verification),
        complete("Changed and verified."),
    ]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(&channel, &shell, config(10)).run("edit config");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    assert_eq!(outcome.steps_taken, 4);
    assert_eq!(outcome.turns.len(), 4);
    assert_eq!(outcome.turns[1].next_action_hint.as_deref(), Some(VERIFY_FIRST_HINT));
    assert!(!outcome.turns[1].overarching_goal_complete);
    assert!(outcome.turns[3].overarching_goal_complete);

    let blocked = outcome
        .events
        .iter()
        .filter(|event| event.type_name() == "phase_transition_blocked")
        .count();
    assert_eq!(blocked, 1);
    assert_eq!(
        shell.commands(),
        vec!["sed -i 's/a/b/' app.cfg", "grep b app.cfg"]
    );
}

#[test]
fn failed_verification_still_clears_the_gate() {
    let channel = ScriptedChannel::new([
        run("touch out.txt", Phase::Mutation),
        run("test -s out.txt", Phase::Verification),
        complete("Created."),
    ]);
    let shell = ScriptedShell::with_results([
        terminalai::test_support::success("touch out.txt", ""),
        failure("test -s out.txt", 1, ""),
    ]);

    let outcome = AgentLoop::new(&channel, &shell, config(5)).run("create file");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    let verification = outcome.events.iter().find_map(|event| match &event.kind {
        EventKind::CommandExecuted {
            phase: Phase::Verification,
            verification,
            ..
        } => Some(verification.status),
        _ => None,
    });
    assert_eq!(verification, Some(VerificationStatus::EnvironmentError));
}

#[test]
fn context_carries_budget_and_safety_after_history() {
    let channel = ScriptedChannel::new([run("echo hi", Phase::Analysis), complete("ok")]);
    let shell = ScriptedShell::new();

    AgentLoop::new(&channel, &shell, config(3)).run("look around");

    let contexts = channel.contexts();
    assert_eq!(
        event_types(&contexts[0]),
        vec!["runtime_context", "step_budget", "safety_policy"]
    );
    assert_eq!(
        event_types(&contexts[1]),
        vec![
            "session_turn",
            "runtime_context",
            "command_executed",
            "step_budget",
            "safety_policy"
        ]
    );
    assert!(matches!(
        contexts[1][3].kind,
        EventKind::StepBudget {
            current_step: 2,
            max_steps: 3,
            steps_remaining: 1
        }
    ));
}

#[test]
fn continuation_prompt_is_appended_once_across_runs() {
    let shell = ScriptedShell::new();
    let first = ScriptedChannel::new([complete("Done.")]);
    let outcome = AgentLoop::new(&first, &shell, config(3)).run("first goal");

    let hint = outcome.turns[0].next_action_hint.as_deref().expect("hint");
    assert_eq!(hint.matches(DEFAULT_CONTINUATION_PROMPT).count(), 1);
    assert!(outcome.turns[0].continuation_prompt_added);

    let second = ScriptedChannel::new([complete("Also done.")]);
    let resumed = AgentLoop::new(&second, &shell, config(3))
        .with_history(&outcome.turns)
        .run("second goal");
    assert_eq!(resumed.turns.len(), 1);
    assert_eq!(second.contexts()[0][0].type_name(), "session_turn");
}

#[test]
fn continuation_prompt_can_be_disabled() {
    let channel = ScriptedChannel::new([complete("Done.")]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(
        &channel,
        &shell,
        LoopConfig {
            continuation_prompt: None,
            ..config(3)
        },
    )
    .run("goal");

    assert_eq!(outcome.turns[0].next_action_hint.as_deref(), Some("Done."));
    assert!(!event_types(&outcome.events).contains(&"continuation_prompt"));
}

#[test]
fn declined_completion_keeps_looping_with_feedback() {
    let channel = ScriptedChannel::new([complete("Done?"), complete("Done now.")]);
    let shell = ScriptedShell::new();
    let verdicts = std::cell::RefCell::new(vec![
        CompletionVerdict::End,
        CompletionVerdict::Continue(Some("also check logs".to_string())),
    ]);
    let confirm = |_notes: Option<&str>| verdicts.borrow_mut().pop().expect("verdict");

    let outcome = AgentLoop::new(
        &channel,
        &shell,
        LoopConfig {
            confirm_before_complete: true,
            ..config(5)
        },
    )
    .with_collaborators(Collaborators::default().with_confirm_completion(&confirm))
    .run("goal");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    assert_eq!(outcome.turns.len(), 2);
    assert_eq!(
        outcome.turns[0].next_action_hint.as_deref(),
        Some("User declined completion: also check logs")
    );
}

#[test]
fn turn_progress_can_stop_or_steer() {
    let channel = ScriptedChannel::new([run("echo hi", Phase::Analysis), complete("ok")]);
    let shell = ScriptedShell::new();
    let progress = |step: u32, _max: u32| match step {
        1 => TurnProgress::ProceedWith("prefer ls -la".to_string()),
        _ => TurnProgress::Stop,
    };

    let outcome = AgentLoop::new(&channel, &shell, config(5))
        .with_collaborators(Collaborators::default().with_turn_progress(&progress))
        .run("goal");

    assert_eq!(outcome.stop, LoopStop::Aborted);
    assert_eq!(channel.calls(), 1);
    assert!(channel.contexts()[0].iter().any(|event| matches!(
        &event.kind,
        EventKind::UserTurnInstruction { instruction } if instruction == "prefer ls -la"
    )));
}

#[test]
fn safe_failure_decision_finishes_without_running_anything() {
    let channel = ScriptedChannel::new([Decision::safe_failure("Decision request timed out")]);
    let shell = ScriptedShell::new();

    let outcome = AgentLoop::new(&channel, &shell, config(3)).run("goal");

    assert_eq!(outcome.stop, LoopStop::Finished);
    assert!(shell.commands().is_empty());
    assert!(!outcome.turns[0].overarching_goal_complete);
    assert!(!outcome.goal_complete());
}

#[test]
fn commands_run_in_the_configured_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let channel = ScriptedChannel::new([run("ls", Phase::Analysis), complete("ok")]);
    let shell = ScriptedShell::new();

    AgentLoop::new(
        &channel,
        &shell,
        LoopConfig {
            working_directory: Some(dir.path().to_path_buf()),
            ..config(3)
        },
    )
    .run("goal");

    assert_eq!(shell.requests()[0].cwd.as_deref(), Some(dir.path()));
}

#[test]
fn blocked_mutation_leaves_completion_open() {
    let channel = ScriptedChannel::new([
        run("sed -i s/a/b/ notes.txt", Phase::Mutation),
        complete("Nothing changed."),
    ]);
    let shell = ScriptedShell::with_results([ExecutionResult::blocked(
        "sed -i s/a/b/ notes.txt",
        "bash",
        "command blocked by denylist policy",
    )]);

    let outcome = AgentLoop::new(&channel, &shell, config(5)).run("edit notes");

    assert_eq!(outcome.stop, LoopStop::GoalComplete);
    assert_eq!(channel.calls(), 2);
    let types = event_types(&outcome.events);
    assert!(types.contains(&"command_blocked"), "{types:?}");
    assert!(!types.contains(&"command_executed"), "{types:?}");
    assert!(!types.contains(&"phase_transition_blocked"), "{types:?}");
    assert!(outcome.turns[0].output.contains("denylist"));
}

#[test]
fn blank_answer_to_a_question_stops_awaiting_the_user() {
    let channel = ScriptedChannel::new([ask("Which environment?"), complete("never")]);
    let shell = ScriptedShell::new();
    let answer = |_question: &str| "   ".to_string();

    let outcome = AgentLoop::new(&channel, &shell, config(5))
        .with_collaborators(Collaborators::default().with_request_feedback(&answer))
        .run("deploy");

    assert_eq!(outcome.stop, LoopStop::AwaitingUser);
    assert_eq!(outcome.turns.len(), 1);
    assert!(outcome.turns[0].awaiting_user_feedback);
    assert_eq!(channel.calls(), 1);
    assert!(
        !event_types(&outcome.events).contains(&"user_feedback"),
        "{:?}",
        event_types(&outcome.events)
    );
}
