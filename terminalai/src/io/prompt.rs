//! System instruction rendering for decision requests.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::SafetyMode;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .expect("system template should be valid");
    env
});

/// Values that vary the system instructions between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPromptInputs<'a> {
    /// Shell from the latest `runtime_context` event; `None` falls back to generic rules.
    pub shell: Option<&'a str>,
    pub safety_mode: SafetyMode,
    pub allow_user_questions: bool,
    /// Operator-supplied instructions appended to the defaults.
    pub extra_instructions: Option<&'a str>,
}

/// Render the system instructions.
pub fn render_system_prompt(inputs: &SystemPromptInputs<'_>) -> Result<String> {
    let shell = inputs.shell.unwrap_or("shell");
    let template = ENGINE.get_template("system").context("load system template")?;
    let rendered = template
        .render(context! {
            shell => shell,
            shell_rules => shell_rules(shell),
            safety_mode => inputs.safety_mode.as_str(),
            allow_user_questions => inputs.allow_user_questions,
            extra_instructions => inputs.extra_instructions.map(str::trim).filter(|s| !s.is_empty()),
        })
        .context("render system template")?;
    Ok(rendered)
}

/// Quoting and syntax rules for the target shell.
pub fn shell_rules(shell: &str) -> &'static [&'static str] {
    match shell.trim().to_ascii_lowercase().as_str() {
        "bash" | "sh" | "shell" => &[
            "Commands run via `bash -lc`; the whole command is one string.",
            "Quote paths with spaces using single quotes; escape embedded single quotes as '\\''.",
            "Chain dependent steps with `&&` so a failure stops the chain.",
            "Avoid interactive programs; pass non-interactive flags such as `-y` where needed.",
        ],
        "powershell" | "pwsh" => &[
            "Commands run via `powershell -NoProfile -NonInteractive -Command`.",
            "Use PowerShell cmdlets and syntax, not cmd or bash syntax.",
            "Quote literal strings with single quotes; double embedded single quotes ('').",
            "Separate statements with `;` and check `$LASTEXITCODE` for native programs.",
        ],
        "cmd" => &[
            "Commands run via `cmd /d /s /c`; use cmd.exe built-ins and syntax.",
            "Quote paths with spaces using double quotes.",
            "Escape `&`, `|`, `<`, `>` and `^` with `^` when they must be literal.",
            "Chain dependent steps with `&&`.",
        ],
        _ => &[
            "Use portable POSIX syntax unless the runtime context names another shell.",
            "Avoid interactive programs.",
        ],
    }
}
