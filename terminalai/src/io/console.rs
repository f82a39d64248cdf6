//! Console-backed collaborators.

use std::cell::RefCell;
use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};

use tracing::warn;

use crate::collaborators::{
    CompletionVerdict, ConfirmCommand, ConfirmCompletion, RequestFeedback, RequestTurnProgress,
    TurnProgress,
};

/// Line-oriented prompts over a reader/writer pair.
///
/// Read or write failures are treated as an empty answer, which every
/// collaborator maps to its most conservative outcome.
pub struct ConsolePrompter<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl ConsolePrompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsolePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    /// Print `prompt` and read one trimmed line. `None` on EOF or I/O error.
    pub fn ask(&self, prompt: &str) -> Option<String> {
        {
            let mut output = self.output.borrow_mut();
            if let Err(err) = write!(output, "{prompt}").and_then(|()| output.flush()) {
                warn!(err = %err, "failed to write prompt");
            }
        }
        let mut line = String::new();
        match self.input.borrow_mut().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(err) => {
                warn!(err = %err, "failed to read answer");
                None
            }
        }
    }

    pub fn say(&self, text: &str) {
        if let Err(err) = writeln!(self.output.borrow_mut(), "{text}") {
            warn!(err = %err, "failed to write console output");
        }
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        matches!(
            self.ask(prompt).as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        )
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }
}

impl<R: BufRead, W: Write> ConfirmCommand for ConsolePrompter<R, W> {
    fn confirm_command(&self, command: &str) -> bool {
        self.say(&format!("Destructive command proposed:\n  {command}"));
        self.ask_yes_no("Run it? [y/N] ")
    }
}

impl<R: BufRead, W: Write> RequestFeedback for ConsolePrompter<R, W> {
    fn request_feedback(&self, question: &str) -> String {
        self.say(question);
        self.ask("> ").unwrap_or_default()
    }
}

impl<R: BufRead, W: Write> RequestTurnProgress for ConsolePrompter<R, W> {
    fn request_turn_progress(&self, step: u32, max_steps: u32) -> TurnProgress {
        let answer = self.ask(&format!(
            "Step {step}/{max_steps}: press Enter to continue, type an instruction, or 'q' to stop: "
        ));
        match answer.as_deref() {
            None => TurnProgress::Stop,
            Some(text) if matches!(text.to_ascii_lowercase().as_str(), "q" | "quit" | "stop") => {
                TurnProgress::Stop
            }
            Some("") => TurnProgress::Proceed,
            Some(text) => TurnProgress::ProceedWith(text.to_string()),
        }
    }
}

impl<R: BufRead, W: Write> ConfirmCompletion for ConsolePrompter<R, W> {
    fn confirm_completion(&self, notes: Option<&str>) -> CompletionVerdict {
        if let Some(notes) = notes.filter(|notes| !notes.trim().is_empty()) {
            self.say(notes);
        }
        if self.ask_yes_no("Is the task complete? [y/N] ") {
            return CompletionVerdict::End;
        }
        let feedback = self
            .ask("What should happen next? ")
            .filter(|text| !text.is_empty());
        CompletionVerdict::Continue(feedback)
    }
}
