//! Capability interfaces the loop consults for human decisions.
//!
//! Each capability is optional. An absent confirmation means "never confirm";
//! an absent feedback collector means "stop and wait".

/// Approve or decline a destructive command before it runs.
pub trait ConfirmCommand {
    fn confirm_command(&self, command: &str) -> bool;
}

/// Answer a question the decision channel asked the user.
pub trait RequestFeedback {
    /// Empty feedback stops the run.
    fn request_feedback(&self, question: &str) -> String;
}

/// Answer to a manual turn-progress gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnProgress {
    Proceed,
    /// Proceed, passing an extra instruction to the next decision request.
    ProceedWith(String),
    Stop,
}

/// Gate each step behind an explicit go-ahead.
pub trait RequestTurnProgress {
    fn request_turn_progress(&self, step: u32, max_steps: u32) -> TurnProgress;
}

/// Answer to a completion confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionVerdict {
    End,
    /// Keep going, optionally with feedback for the decision channel.
    Continue(Option<String>),
}

/// Confirm that the run may end.
pub trait ConfirmCompletion {
    fn confirm_completion(&self, notes: Option<&str>) -> CompletionVerdict;
}

impl<F: Fn(&str) -> bool> ConfirmCommand for F {
    fn confirm_command(&self, command: &str) -> bool {
        self(command)
    }
}

impl<F: Fn(&str) -> String> RequestFeedback for F {
    fn request_feedback(&self, question: &str) -> String {
        self(question)
    }
}

impl<F: Fn(u32, u32) -> TurnProgress> RequestTurnProgress for F {
    fn request_turn_progress(&self, step: u32, max_steps: u32) -> TurnProgress {
        self(step, max_steps)
    }
}

impl<F: Fn(Option<&str>) -> CompletionVerdict> ConfirmCompletion for F {
    fn confirm_completion(&self, notes: Option<&str>) -> CompletionVerdict {
        self(notes)
    }
}

/// The set of collaborators injected into one loop.
#[derive(Clone, Copy, Default)]
pub struct Collaborators<'a> {
    pub confirm_command: Option<&'a dyn ConfirmCommand>,
    pub request_feedback: Option<&'a dyn RequestFeedback>,
    pub turn_progress: Option<&'a dyn RequestTurnProgress>,
    pub confirm_completion: Option<&'a dyn ConfirmCompletion>,
}

impl<'a> Collaborators<'a> {
    pub fn with_confirm_command(mut self, hook: &'a dyn ConfirmCommand) -> Self {
        self.confirm_command = Some(hook);
        self
    }

    pub fn with_request_feedback(mut self, hook: &'a dyn RequestFeedback) -> Self {
        self.request_feedback = Some(hook);
        self
    }

    pub fn with_turn_progress(mut self, hook: &'a dyn RequestTurnProgress) -> Self {
        self.turn_progress = Some(hook);
        self
    }

    pub fn with_confirm_completion(mut self, hook: &'a dyn ConfirmCompletion) -> Self {
        self.confirm_completion = Some(hook);
        self
    }
}
