//! Phase gating: completion is refused while a mutation is unverified.

use crate::core::types::Phase;

/// Tracks whether a `mutation` command ran since the last `verification` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseGate {
    pending_mutation: Option<String>,
}

impl PhaseGate {
    /// Record a command that actually ran (blocked or declined commands are not recorded).
    pub fn record_execution(&mut self, phase: Phase, command: &str) {
        match phase {
            Phase::Mutation => self.pending_mutation = Some(command.to_string()),
            Phase::Verification => self.pending_mutation = None,
            Phase::Analysis | Phase::Completion => {}
        }
    }

    /// Whether a completion claim must be refused right now.
    pub fn blocks_completion(&self) -> bool {
        self.pending_mutation.is_some()
    }

    /// The mutation command still awaiting verification.
    pub fn pending_mutation(&self) -> Option<&str> {
        self.pending_mutation.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_blocks_until_verification() {
        let mut gate = PhaseGate::default();
        assert!(!gate.blocks_completion());

        gate.record_execution(Phase::Mutation, "sed -i s/a/b/ f.txt");
        assert!(gate.blocks_completion());
        assert_eq!(gate.pending_mutation(), Some("sed -i s/a/b/ f.txt"));

        gate.record_execution(Phase::Analysis, "ls");
        assert!(gate.blocks_completion());

        gate.record_execution(Phase::Verification, "grep b f.txt");
        assert!(!gate.blocks_completion());
    }

    #[test]
    fn latest_mutation_is_reported() {
        let mut gate = PhaseGate::default();
        gate.record_execution(Phase::Mutation, "touch a");
        gate.record_execution(Phase::Mutation, "touch b");
        assert_eq!(gate.pending_mutation(), Some("touch b"));
    }
}
