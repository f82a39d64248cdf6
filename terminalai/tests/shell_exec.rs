//! Executor tests that spawn a real POSIX shell.

#![cfg(unix)]

use std::time::{Duration, Instant};

use terminalai::core::classifier::classify_execution;
use terminalai::core::types::VerificationStatus;
use terminalai::io::shell::{CommandRequest, ShellAdapter, ShellExecutor, ShellKind};

fn sh() -> ShellExecutor {
    ShellExecutor::new(ShellKind::Bash).with_executable("sh")
}

#[test]
fn captures_stdout_and_exit_code() {
    let result = sh().execute(&CommandRequest::new("echo hi"));

    assert_eq!(result.returncode, 0);
    assert_eq!(result.stdout.trim(), "hi");
    assert!(result.executed);
    assert_eq!(classify_execution(&result).status, VerificationStatus::Success);
}

#[test]
fn nonzero_exit_keeps_stderr() {
    let result = sh().execute(&CommandRequest::new("echo 'assertion failed' >&2; exit 3"));

    assert_eq!(result.returncode, 3);
    assert!(result.stderr.contains("assertion failed"));
    assert_eq!(
        classify_execution(&result).status,
        VerificationStatus::FailedAssertion
    );
}

#[test]
fn timeout_kills_the_whole_command_and_keeps_partial_output() {
    let request = CommandRequest::new("echo partial; sleep 6; echo done")
        .timeout(Some(Duration::from_secs(1)));
    let started = Instant::now();
    let result = sh().execute(&request);

    assert!(result.timed_out);
    assert_eq!(result.returncode, 124);
    assert_eq!(result.stdout.trim(), "partial");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(
        classify_execution(&result).status,
        VerificationStatus::EnvironmentError
    );
}

#[test]
fn background_job_does_not_block_the_result() {
    let request = CommandRequest::new("sleep 10 & echo started")
        .timeout(Some(Duration::from_secs(4)));
    let started = Instant::now();
    let result = sh().execute(&request);

    assert!(!result.timed_out);
    assert_eq!(result.returncode, 0);
    assert_eq!(result.stdout.trim(), "started");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn missing_shell_executable_is_127() {
    let shell = ShellExecutor::new(ShellKind::Bash).with_executable("/nonexistent/terminalai-sh");
    let result = shell.execute(&CommandRequest::new("echo hi"));

    assert_eq!(result.returncode, 127);
    assert!(!result.executed);
    assert!(result.stderr.contains("executable not found"));
}

#[test]
fn runs_in_the_requested_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("marker.txt"), "x").expect("write marker");

    let request = CommandRequest::new("ls").cwd(Some(dir.path()));
    let result = sh().execute(&request);

    assert_eq!(result.returncode, 0);
    assert!(result.stdout.contains("marker.txt"));
}

#[test]
fn output_beyond_the_limit_is_truncated_with_a_notice() {
    let shell = sh().with_output_limit(16);
    let result = shell.execute(&CommandRequest::new("printf '%0100d' 0"));

    assert!(result.stdout.starts_with(&"0".repeat(16)));
    assert!(result.stdout.contains("[stdout truncated 84 bytes]"));
}
