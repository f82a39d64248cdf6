//! Step budget bookkeeping for the orchestration loop.

use crate::core::events::EventKind;

/// Position of the current step within the run's step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    pub current_step: u32,
    pub max_steps: u32,
}

impl StepBudget {
    pub fn new(current_step: u32, max_steps: u32) -> Self {
        Self {
            current_step,
            max_steps,
        }
    }

    /// Steps left after the current one.
    pub fn steps_remaining(&self) -> u32 {
        self.max_steps.saturating_sub(self.current_step)
    }

    pub fn event(&self) -> EventKind {
        EventKind::StepBudget {
            current_step: self.current_step,
            max_steps: self.max_steps,
            steps_remaining: self.steps_remaining(),
        }
    }
}

/// Hint text for the synthetic turn appended when the budget runs out.
pub fn exhausted_message(max_steps: u32) -> String {
    format!(
        "Step budget exhausted. Reached step {max_steps}/{max_steps}. \
         The goal was not confirmed complete."
    )
}
