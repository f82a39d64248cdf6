//! Scripted fakes and builders for loop tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::events::ContextEvent;
use crate::core::types::{Decision, ExecutionResult, Phase};
use crate::io::channel::DecisionChannel;
use crate::io::session_log::SessionLog;
use crate::io::shell::{CommandRequest, ShellAdapter};

/// Decision channel that replays a fixed script and records every context it saw.
///
/// Once the script runs out it answers with a safe failure, like a channel
/// whose endpoint went away.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    script: RefCell<VecDeque<Decision>>,
    contexts: RefCell<Vec<Vec<ContextEvent>>>,
}

impl ScriptedChannel {
    pub fn new(script: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
            contexts: RefCell::new(Vec::new()),
        }
    }

    /// Contexts passed to each `next_decision` call, in order.
    pub fn contexts(&self) -> Vec<Vec<ContextEvent>> {
        self.contexts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.contexts.borrow().len()
    }
}

impl DecisionChannel for ScriptedChannel {
    fn next_decision(&self, _goal: &str, context: &[ContextEvent]) -> Decision {
        self.contexts.borrow_mut().push(context.to_vec());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Decision::safe_failure("script exhausted"))
    }
}

/// One request the scripted shell received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub dry_run: bool,
    pub confirmed: bool,
}

/// Shell adapter that never spawns anything.
///
/// Returns scripted results in order, then `exit 0` with `ok` on stdout.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    results: RefCell<VecDeque<ExecutionResult>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }
}

impl ShellAdapter for ScriptedShell {
    fn name(&self) -> &str {
        "bash"
    }

    fn execute(&self, request: &CommandRequest<'_>) -> ExecutionResult {
        self.requests.borrow_mut().push(RecordedRequest {
            command: request.command.to_string(),
            cwd: request.cwd.map(PathBuf::from),
            dry_run: request.dry_run,
            confirmed: request.confirmed,
        });
        let mut result = self
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| success(request.command, "ok"));
        result.command = request.command.to_string();
        result
    }
}

/// A decision that runs `command` in `phase`.
pub fn run(command: &str, phase: Phase) -> Decision {
    Decision {
        command: Some(command.to_string()),
        phase,
        ..Decision::default()
    }
}

/// A decision that declares the goal complete.
pub fn complete(notes: &str) -> Decision {
    Decision {
        notes: Some(notes.to_string()),
        complete: true,
        phase: Phase::Completion,
        ..Decision::default()
    }
}

/// A decision that asks the user `question`.
pub fn ask(question: &str) -> Decision {
    Decision {
        ask_user: true,
        user_question: Some(question.to_string()),
        ..Decision::default()
    }
}

/// An executed result with exit code 0.
pub fn success(command: &str, stdout: &str) -> ExecutionResult {
    let mut result = ExecutionResult::not_run(command, "bash", 0, "");
    result.stdout = stdout.to_string();
    result.executed = true;
    result.duration = Duration::from_millis(5);
    result
}

/// An executed result with a nonzero exit code.
pub fn failure(command: &str, returncode: i32, stderr: &str) -> ExecutionResult {
    let mut result = ExecutionResult::not_run(command, "bash", returncode, stderr);
    result.executed = true;
    result.duration = Duration::from_millis(5);
    result
}

/// A session log rooted in a fresh temporary directory.
///
/// Keep the `TempDir` alive for as long as the log is used.
pub fn temp_session_log() -> (TempDir, SessionLog) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = SessionLog::new(dir.path().join("logs"));
    (dir, log)
}
