//! Guarded shell execution.
//!
//! [`ShellAdapter`] is the seam the orchestration loop executes through. The
//! production implementation, [`ShellExecutor`], covers Bash, Cmd and
//! PowerShell as variants of [`ShellKind`]; each variant owns its invocation
//! arguments, elevation strategy and output-decoding chain. Tests substitute
//! scripted adapters.
//!
//! Guardrails run before anything is spawned, in a fixed order: denylist hook,
//! allowlist hook, then the destructive-pattern check.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::guardrails::{is_destructive, redact_secrets};
use crate::core::types::ExecutionResult;
use crate::io::decode::{Encoding, POSIX_CHAIN, WINDOWS_CHAIN, decode_output};
use crate::io::process::{CommandOutput, is_not_found, run_command_with_timeout};

pub const DENYLIST_REASON: &str = "command blocked by denylist policy";
pub const ALLOWLIST_REASON: &str = "command rejected by allowlist policy";
pub const CONFIRMATION_REASON: &str = "destructive command requires explicit confirmation";
pub const DRY_RUN_STDOUT: &str = "dry-run: command not executed";
pub const UAC_NOTE: &str =
    "Command was launched through a UAC elevation boundary; child process output may be unavailable.";

/// Default per-stream capture limit.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

static ALREADY_ELEVATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(sudo|doas|su)\b").expect("elevation prefix pattern should be valid")
});

/// Policy predicate over `(command, shell_name)`.
pub type PolicyHook = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Raised when a shell name does not map to a supported adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    #[error("Unsupported shell adapter: {0}")]
    Unsupported(String),
}

/// Pre-execution policy checks.
pub struct Guardrails {
    allowlist: Option<PolicyHook>,
    denylist: Option<PolicyHook>,
    confirmation_mode: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            allowlist: None,
            denylist: None,
            confirmation_mode: true,
        }
    }
}

impl fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guardrails")
            .field("allowlist", &self.allowlist.is_some())
            .field("denylist", &self.denylist.is_some())
            .field("confirmation_mode", &self.confirmation_mode)
            .finish()
    }
}

impl Guardrails {
    /// Commands must satisfy `hook` to run.
    pub fn with_allowlist(mut self, hook: PolicyHook) -> Self {
        self.allowlist = Some(hook);
        self
    }

    /// Commands satisfying `hook` never run.
    pub fn with_denylist(mut self, hook: PolicyHook) -> Self {
        self.denylist = Some(hook);
        self
    }

    /// When false, destructive commands run without a prior confirmation.
    pub fn with_confirmation_mode(mut self, enabled: bool) -> Self {
        self.confirmation_mode = enabled;
        self
    }

    /// Build regex-backed hooks. An empty allowlist permits everything.
    pub fn from_patterns(allowlist: &[String], denylist: &[String]) -> Result<Self> {
        let mut guardrails = Self::default();
        if !allowlist.is_empty() {
            let patterns = compile_patterns(allowlist).context("invalid allowlist pattern")?;
            guardrails = guardrails.with_allowlist(Box::new(move |command: &str, _shell: &str| {
                patterns.iter().any(|pattern| pattern.is_match(command))
            }));
        }
        if !denylist.is_empty() {
            let patterns = compile_patterns(denylist).context("invalid denylist pattern")?;
            guardrails = guardrails.with_denylist(Box::new(move |command: &str, _shell: &str| {
                patterns.iter().any(|pattern| pattern.is_match(command))
            }));
        }
        Ok(guardrails)
    }

    /// Reason the command must not run, if any.
    pub fn check(
        &self,
        command: &str,
        shell: &str,
        dry_run: bool,
        confirmed: bool,
    ) -> Option<&'static str> {
        if self.denylist.as_ref().is_some_and(|hook| hook(command, shell)) {
            return Some(DENYLIST_REASON);
        }
        if self.allowlist.as_ref().is_some_and(|hook| !hook(command, shell)) {
            return Some(ALLOWLIST_REASON);
        }
        if self.confirmation_mode && is_destructive(command) && !(confirmed || dry_run) {
            return Some(CONFIRMATION_REASON);
        }
        None
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).with_context(|| format!("compile `{pattern}`")))
        .collect()
}

/// One command execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest<'a> {
    pub command: &'a str,
    pub cwd: Option<&'a Path>,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    /// The caller already obtained confirmation for a destructive command.
    pub confirmed: bool,
}

impl<'a> CommandRequest<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            cwd: None,
            timeout: None,
            dry_run: false,
            confirmed: false,
        }
    }

    pub fn cwd(mut self, cwd: Option<&'a Path>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

/// Abstraction over command execution backends.
pub trait ShellAdapter {
    /// Stable adapter name used for logging and shell-specific prompt rules.
    fn name(&self) -> &str;

    /// Run `request` and return a normalized result. Never fails: every
    /// failure mode maps onto an exit code.
    fn execute(&self, request: &CommandRequest<'_>) -> ExecutionResult;

    fn is_destructive(&self, command: &str) -> bool {
        is_destructive(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Cmd,
    PowerShell,
}

impl ShellKind {
    /// Map a user-facing shell name onto a variant.
    pub fn parse(name: &str) -> Result<Self, ShellError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bash" | "sh" | "shell" => Ok(ShellKind::Bash),
            "cmd" | "cmd.exe" => Ok(ShellKind::Cmd),
            "powershell" | "powershell.exe" | "pwsh" => Ok(ShellKind::PowerShell),
            _ => Err(ShellError::Unsupported(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Cmd => "cmd",
            ShellKind::PowerShell => "powershell",
        }
    }

    fn invocation_args(self) -> &'static [&'static str] {
        match self {
            ShellKind::Bash => &["-lc"],
            ShellKind::Cmd => &["/d", "/s", "/c"],
            ShellKind::PowerShell => &["-NoProfile", "-NonInteractive", "-Command"],
        }
    }

    fn decode_chain(self) -> &'static [Encoding] {
        match self {
            ShellKind::Bash => POSIX_CHAIN,
            ShellKind::Cmd | ShellKind::PowerShell => WINDOWS_CHAIN,
        }
    }

    /// Resolve the executable: `bash` else `sh`; `pwsh` else `powershell.exe`.
    fn default_executable(self) -> String {
        let resolvable = |program: &str| which::which(program).is_ok();
        match self {
            ShellKind::Bash if !resolvable("bash") && resolvable("sh") => "sh".to_string(),
            ShellKind::Bash => "bash".to_string(),
            ShellKind::Cmd => "cmd.exe".to_string(),
            ShellKind::PowerShell if resolvable("pwsh") => "pwsh".to_string(),
            ShellKind::PowerShell => "powershell.exe".to_string(),
        }
    }
}

/// Shell name used when nothing is configured.
pub fn default_shell_name() -> &'static str {
    if cfg!(windows) { "powershell" } else { "bash" }
}

/// Host facts that decide how elevation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevationEnv {
    pub windows: bool,
    pub sudo_available: bool,
}

impl ElevationEnv {
    pub fn detect() -> Self {
        Self {
            windows: cfg!(windows),
            sudo_available: which::which("sudo").is_ok(),
        }
    }
}

/// The concrete process to spawn for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    elevated: bool,
    elevation_error: Option<String>,
    /// Output crosses a UAC boundary and may be missing.
    uac_wrapped: bool,
}

/// Production [`ShellAdapter`] for Bash, Cmd and PowerShell.
#[derive(Debug)]
pub struct ShellExecutor {
    kind: ShellKind,
    executable: String,
    guardrails: Guardrails,
    elevate: bool,
    elevation_env: ElevationEnv,
    output_limit_bytes: usize,
}

impl ShellExecutor {
    pub fn new(kind: ShellKind) -> Self {
        Self {
            kind,
            executable: kind.default_executable(),
            guardrails: Guardrails::default(),
            elevate: false,
            elevation_env: ElevationEnv::detect(),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    pub fn with_elevation_env(mut self, env: ElevationEnv) -> Self {
        self.elevation_env = env;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn kind(&self) -> ShellKind {
        self.kind
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn plain_invocation(&self, command: &str) -> Invocation {
        let mut args: Vec<String> = self
            .kind
            .invocation_args()
            .iter()
            .map(|arg| (*arg).to_string())
            .collect();
        args.push(command.to_string());
        Invocation {
            program: self.executable.clone(),
            args,
            elevated: false,
            elevation_error: None,
            uac_wrapped: false,
        }
    }

    fn plan_invocation(&self, command: &str) -> Invocation {
        let plain = self.plain_invocation(command);
        if !self.elevate {
            return plain;
        }
        let env = self.elevation_env;
        match self.kind {
            ShellKind::Bash if env.windows => unelevated(
                plain,
                "Elevation requested with bash on Windows; sudo strategy is unsupported. \
                 Running without elevation."
                    .to_string(),
            ),
            ShellKind::Bash if ALREADY_ELEVATED.is_match(command) => plain,
            ShellKind::Bash if env.sudo_available => Invocation {
                elevated: true,
                ..self.plain_invocation(&format!("sudo -- {command}"))
            },
            ShellKind::Bash => unelevated(
                plain,
                "Elevation requested but sudo is not available in PATH; \
                 running without elevation."
                    .to_string(),
            ),
            ShellKind::Cmd | ShellKind::PowerShell if !env.windows => unelevated(
                plain,
                format!(
                    "Elevation requested but {} elevation is only supported on Windows; \
                     running without elevation.",
                    self.kind.name()
                ),
            ),
            ShellKind::Cmd | ShellKind::PowerShell => self.runas_invocation(command),
        }
    }

    /// Relaunch through `Start-Process -Verb RunAs` from a PowerShell host.
    fn runas_invocation(&self, command: &str) -> Invocation {
        let escaped = command.replace('\'', "''");
        let (host, target, target_args) = match self.kind {
            ShellKind::Cmd => ("powershell".to_string(), "cmd.exe", "'/d','/s','/c'"),
            _ => (
                self.executable.clone(),
                self.executable.as_str(),
                "'-NoProfile','-NonInteractive','-Command'",
            ),
        };
        let wrapper = format!(
            "Start-Process -FilePath '{target}' -Verb RunAs -ArgumentList {target_args},'{escaped}' -Wait"
        );
        Invocation {
            program: host,
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                wrapper,
            ],
            elevated: true,
            elevation_error: None,
            uac_wrapped: true,
        }
    }

    fn run(&self, request: &CommandRequest<'_>) -> ExecutionResult {
        let name = self.kind.name();
        if let Some(reason) =
            self.guardrails
                .check(request.command, name, request.dry_run, request.confirmed)
        {
            warn!(reason, "command blocked by guardrails");
            return ExecutionResult {
                elevation_requested: self.elevate,
                ..ExecutionResult::blocked(request.command, name, reason)
            };
        }

        if request.dry_run {
            return ExecutionResult {
                stdout: DRY_RUN_STDOUT.to_string(),
                elevation_requested: self.elevate,
                ..ExecutionResult::not_run(request.command, name, 0, "")
            };
        }

        let invocation = self.plan_invocation(request.command);
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        let output = match run_command_with_timeout(cmd, request.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                let (code, stderr) = if is_not_found(&err) {
                    (127, format!("{name} executable not found: {}", invocation.program))
                } else {
                    (126, format!("failed to run {name}: {err:#}"))
                };
                return ExecutionResult {
                    elevation_requested: self.elevate,
                    elevation_error: invocation.elevation_error,
                    ..ExecutionResult::not_run(request.command, name, code, stderr)
                };
            }
        };

        self.normalize(request.command, &invocation, &output)
    }

    fn normalize(
        &self,
        command: &str,
        invocation: &Invocation,
        output: &CommandOutput,
    ) -> ExecutionResult {
        let chain = self.kind.decode_chain();
        let mut stdout = decode_output(&output.stdout, chain);
        stdout.push_str(&CommandOutput::truncated_notice("stdout", output.stdout_truncated));
        let mut stderr = decode_output(&output.stderr, chain);
        stderr.push_str(&CommandOutput::truncated_notice("stderr", output.stderr_truncated));

        if let Some(error) = &invocation.elevation_error {
            stderr = prefix_line(error, &stderr);
        }
        if invocation.uac_wrapped {
            stdout = if stdout.is_empty() {
                UAC_NOTE.to_string()
            } else {
                format!("{stdout}\n{UAC_NOTE}")
            };
        }

        ExecutionResult {
            command: command.to_string(),
            shell: self.kind.name().to_string(),
            returncode: output.exit_code(),
            stdout,
            stderr,
            duration: output.duration,
            timed_out: output.timed_out,
            executed: true,
            blocked: false,
            block_reason: None,
            elevation_requested: self.elevate,
            elevated: invocation.elevated,
            elevation_error: invocation.elevation_error.clone(),
        }
    }
}

fn unelevated(plain: Invocation, error: String) -> Invocation {
    Invocation {
        elevation_error: Some(error),
        ..plain
    }
}

fn prefix_line(line: &str, text: &str) -> String {
    if text.is_empty() {
        line.to_string()
    } else {
        format!("{line}\n{text}")
    }
}

impl ShellAdapter for ShellExecutor {
    fn name(&self) -> &str {
        self.kind.name()
    }

    #[instrument(skip_all, fields(shell = self.kind.name(), dry_run = request.dry_run))]
    fn execute(&self, request: &CommandRequest<'_>) -> ExecutionResult {
        info!(
            command = %redact_secrets(request.command),
            timeout_secs = request.timeout.map(|t| t.as_secs_f64()),
            "command request"
        );
        let result = self.run(request);
        info!(
            returncode = result.returncode,
            timed_out = result.timed_out,
            executed = result.executed,
            blocked = result.blocked,
            duration_secs = result.duration.as_secs_f64(),
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "command result"
        );
        result
    }
}

/// Build the executor for a shell name (`bash`, `sh`, `shell`, `cmd`, `powershell`, `pwsh`).
pub fn create_shell_adapter(name: &str) -> Result<ShellExecutor, ShellError> {
    let kind = ShellKind::parse(name)?;
    let executor = ShellExecutor::new(kind);
    Ok(match name.trim().to_ascii_lowercase().as_str() {
        "sh" => executor.with_executable("sh"),
        _ => executor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(kind: ShellKind, env: ElevationEnv) -> ShellExecutor {
        ShellExecutor::new(kind)
            .with_executable(kind.name())
            .with_elevation(true)
            .with_elevation_env(env)
    }

    const UNIX_SUDO: ElevationEnv = ElevationEnv {
        windows: false,
        sudo_available: true,
    };
    const UNIX_NO_SUDO: ElevationEnv = ElevationEnv {
        windows: false,
        sudo_available: false,
    };
    const WINDOWS: ElevationEnv = ElevationEnv {
        windows: true,
        sudo_available: false,
    };

    #[test]
    fn denylist_wins_over_allowlist() {
        let guardrails = Guardrails::default()
            .with_allowlist(Box::new(|_: &str, _: &str| true))
            .with_denylist(Box::new(|command: &str, _: &str| command.contains("curl")));
        assert_eq!(
            guardrails.check("curl example.com", "bash", false, true),
            Some(DENYLIST_REASON)
        );
        assert_eq!(guardrails.check("ls", "bash", false, false), None);
    }

    #[test]
    fn allowlist_rejects_before_destructive_check() {
        let guardrails = Guardrails::default().with_allowlist(Box::new(|command: &str, _: &str| {
            command.starts_with("ls")
        }));
        assert_eq!(
            guardrails.check("rm -rf ./tmp", "bash", false, false),
            Some(ALLOWLIST_REASON)
        );
    }

    #[test]
    fn destructive_needs_confirmation_or_dry_run() {
        let guardrails = Guardrails::default();
        assert_eq!(
            guardrails.check("rm -rf ./tmp", "bash", false, false),
            Some(CONFIRMATION_REASON)
        );
        assert_eq!(guardrails.check("rm -rf ./tmp", "bash", false, true), None);
        assert_eq!(guardrails.check("rm -rf ./tmp", "bash", true, false), None);

        let relaxed = Guardrails::default().with_confirmation_mode(false);
        assert_eq!(relaxed.check("rm -rf ./tmp", "bash", false, false), None);
    }

    #[test]
    fn pattern_hooks_compile_and_reject_bad_regex() {
        let guardrails =
            Guardrails::from_patterns(&["^git ".to_string()], &["push".to_string()])
                .expect("patterns");
        assert_eq!(guardrails.check("git status", "bash", false, false), None);
        assert_eq!(
            guardrails.check("git push", "bash", false, false),
            Some(DENYLIST_REASON)
        );
        assert_eq!(
            guardrails.check("ls", "bash", false, false),
            Some(ALLOWLIST_REASON)
        );

        let err = Guardrails::from_patterns(&["(".to_string()], &[]).unwrap_err();
        assert!(format!("{err:#}").contains("invalid allowlist pattern"));
    }

    #[test]
    fn blocked_and_dry_run_spawn_nothing() {
        let shell = ShellExecutor::new(ShellKind::Bash).with_executable("missing-shell-xyz");

        let blocked = shell.execute(&CommandRequest::new("rm -rf ./tmp"));
        assert!(blocked.blocked);
        assert_eq!(blocked.returncode, 126);
        assert_eq!(blocked.block_reason.as_deref(), Some(CONFIRMATION_REASON));

        let dry = shell.execute(&CommandRequest::new("rm -rf ./tmp").dry_run(true));
        assert!(!dry.blocked);
        assert!(!dry.executed);
        assert_eq!(dry.returncode, 0);
        assert_eq!(dry.stdout, DRY_RUN_STDOUT);
    }

    #[test]
    fn missing_executable_is_127() {
        let shell = ShellExecutor::new(ShellKind::Bash).with_executable("missing-shell-xyz");
        let result = shell.execute(&CommandRequest::new("echo hi"));
        assert_eq!(result.returncode, 127);
        assert!(!result.executed);
        assert_eq!(result.stderr, "bash executable not found: missing-shell-xyz");
    }

    #[test]
    fn bash_elevation_prefixes_sudo_once() {
        let plan = executor(ShellKind::Bash, UNIX_SUDO).plan_invocation("apt update");
        assert!(plan.elevated);
        assert_eq!(plan.args, vec!["-lc", "sudo -- apt update"]);

        let plan = executor(ShellKind::Bash, UNIX_SUDO).plan_invocation("sudo apt update");
        assert!(!plan.elevated);
        assert_eq!(plan.args, vec!["-lc", "sudo apt update"]);
        assert_eq!(plan.elevation_error, None);
    }

    #[test]
    fn bash_without_sudo_runs_unprivileged_with_note() {
        let plan = executor(ShellKind::Bash, UNIX_NO_SUDO).plan_invocation("apt update");
        assert!(!plan.elevated);
        assert_eq!(plan.args, vec!["-lc", "apt update"]);
        assert!(
            plan.elevation_error
                .as_deref()
                .is_some_and(|e| e.contains("sudo is not available"))
        );
    }

    #[test]
    fn windows_elevation_wraps_in_runas() {
        let plan = executor(ShellKind::Cmd, WINDOWS).plan_invocation("echo it's");
        assert!(plan.elevated);
        assert!(plan.uac_wrapped);
        assert_eq!(plan.program, "powershell");
        let wrapper = plan.args.last().expect("wrapper");
        assert!(wrapper.starts_with("Start-Process -FilePath 'cmd.exe' -Verb RunAs"));
        assert!(wrapper.contains("'/d','/s','/c','echo it''s'"));

        let plan = executor(ShellKind::PowerShell, UNIX_SUDO).plan_invocation("Get-Date");
        assert!(!plan.elevated);
        assert!(
            plan.elevation_error
                .as_deref()
                .is_some_and(|e| e.contains("only supported on Windows"))
        );
    }

    #[test]
    fn factory_normalizes_names() {
        assert_eq!(
            create_shell_adapter(" Bash ").expect("bash").kind(),
            ShellKind::Bash
        );
        assert_eq!(create_shell_adapter("sh").expect("sh").executable(), "sh");
        assert_eq!(
            create_shell_adapter("pwsh").expect("pwsh").kind(),
            ShellKind::PowerShell
        );
        assert_eq!(
            create_shell_adapter("cmd").expect("cmd").name(),
            "cmd"
        );
        let err = create_shell_adapter("fish").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported shell adapter: fish");
    }
}
