//! Deterministic verification classification of executed commands.

use crate::core::types::{ExecutionResult, VerificationResult, VerificationStatus};

const ASSERTION_TOKENS: &[&str] = &["assert", "expect", "failed", "failure"];

const ENVIRONMENT_TOKENS: &[&str] = &[
    "not found",
    "no such file",
    "permission denied",
    "access is denied",
    "is not recognized",
    "timeout",
    "timed out",
    "connection refused",
    "could not resolve",
    "network is unreachable",
    "no space left",
];

/// Classify an execution result into a [`VerificationResult`].
///
/// Order: guardrail block, timeout, exit code 0, assertion tokens in stderr,
/// environment tokens in stderr, then a generic environment error.
pub fn classify_execution(result: &ExecutionResult) -> VerificationResult {
    if result.blocked {
        let reason = result.block_reason.as_deref().unwrap_or("blocked by policy");
        return verdict(VerificationStatus::BlockedByPolicy, reason.to_string());
    }
    if result.timed_out {
        return verdict(
            VerificationStatus::EnvironmentError,
            format!("timeout after {:.1}s", result.duration.as_secs_f64()),
        );
    }
    if result.returncode == 0 {
        return verdict(VerificationStatus::Success, "exit code 0".to_string());
    }

    let stderr = result.stderr.to_ascii_lowercase();
    if let Some(token) = first_token(&stderr, ASSERTION_TOKENS) {
        return verdict(
            VerificationStatus::FailedAssertion,
            format!("exit code {} with '{token}' in stderr", result.returncode),
        );
    }
    if let Some(token) = first_token(&stderr, ENVIRONMENT_TOKENS) {
        return verdict(
            VerificationStatus::EnvironmentError,
            format!("exit code {} with '{token}' in stderr", result.returncode),
        );
    }
    verdict(
        VerificationStatus::EnvironmentError,
        format!("exit code {} without a recognized signal", result.returncode),
    )
}

fn first_token<'a>(haystack: &str, tokens: &[&'a str]) -> Option<&'a str> {
    tokens.iter().copied().find(|token| haystack.contains(token))
}

fn verdict(status: VerificationStatus, diagnostic: String) -> VerificationResult {
    VerificationResult { status, diagnostic }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(returncode: i32, stderr: &str) -> ExecutionResult {
        let mut result = ExecutionResult::not_run("cmd", "bash", returncode, stderr);
        result.executed = true;
        result
    }

    #[test]
    fn zero_exit_is_success() {
        let verdict = classify_execution(&result(0, "warning: failed to read cache"));
        assert_eq!(verdict.status, VerificationStatus::Success);
    }

    #[test]
    fn assertion_tokens_win_over_environment_tokens() {
        let verdict = classify_execution(&result(1, "AssertionError: expected 3, file not found"));
        assert_eq!(verdict.status, VerificationStatus::FailedAssertion);
        assert!(verdict.diagnostic.contains("'assert'"));
    }

    #[test]
    fn environment_tokens_are_recognized() {
        let verdict = classify_execution(&result(127, "bash: foo: command not found"));
        assert_eq!(verdict.status, VerificationStatus::EnvironmentError);
        assert!(verdict.diagnostic.contains("not found"));

        let verdict = classify_execution(&result(1, "curl: (7) Connection refused"));
        assert_eq!(verdict.status, VerificationStatus::EnvironmentError);
    }

    #[test]
    fn unknown_nonzero_is_generic_environment_error() {
        let verdict = classify_execution(&result(3, "something odd"));
        assert_eq!(verdict.status, VerificationStatus::EnvironmentError);
        assert!(verdict.diagnostic.contains("without a recognized signal"));
    }

    #[test]
    fn blocked_and_timed_out_results() {
        let blocked = ExecutionResult::blocked("rm -rf /", "bash", "denied by denylist");
        let verdict = classify_execution(&blocked);
        assert_eq!(verdict.status, VerificationStatus::BlockedByPolicy);
        assert_eq!(verdict.diagnostic, "denied by denylist");

        let mut slow = result(124, "");
        slow.timed_out = true;
        slow.duration = Duration::from_secs(2);
        let verdict = classify_execution(&slow);
        assert_eq!(verdict.status, VerificationStatus::EnvironmentError);
        assert_eq!(verdict.diagnostic, "timeout after 2.0s");
    }
}
