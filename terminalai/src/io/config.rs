//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `terminalai.toml`,
//! `terminalai.local.toml` (deep-merged over the former), `TERMINALAI_*`
//! environment variables, then command-line flags (applied by the binary).
//! `TERMINALAI_CONFIG_FILE` or `--config` replaces the two files with one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::SafetyMode;
use crate::core::window::MIN_WINDOW_CHARS;
use crate::io::channel::DEFAULT_API_URL;
use crate::io::shell::{DEFAULT_OUTPUT_LIMIT_BYTES, Guardrails, default_shell_name};

pub const CONFIG_FILE: &str = "terminalai.toml";
pub const LOCAL_CONFIG_FILE: &str = "terminalai.local.toml";
pub const CONFIG_FILE_ENV: &str = "TERMINALAI_CONFIG_FILE";
pub const DEFAULT_MODEL: &str = "gpt-5.2";
pub const DEFAULT_CONTINUATION_PROMPT: &str =
    "Task finished. Do you want to keep going with new instructions?";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

/// Per-model overrides keyed by model name under `[models]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSection {
    pub reasoning_effort: Option<String>,
}

/// Application configuration (TOML).
///
/// Missing fields take the defaults below; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub openai: OpenAiSection,
    /// Fallback API key when `[openai] api_key` is unset.
    pub api_key: Option<String>,
    #[serde(alias = "default_model")]
    pub model: String,
    pub models: BTreeMap<String, ModelSection>,
    /// Explicit reasoning effort; wins over `[models.<name>]` and family defaults.
    pub reasoning_effort: Option<String>,
    pub request_timeout_secs: u64,
    /// Character budget for the context sent with each decision request.
    pub context_char_budget: i64,
    /// Extra operator instructions appended to the built-in system prompt.
    pub system_prompt: Option<String>,
    pub shell: Option<String>,
    pub max_steps: u32,
    #[serde(alias = "working_directory")]
    pub cwd: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub safety_mode: SafetyMode,
    pub elevate: bool,
    pub dry_run: bool,
    /// Per-command timeout; unset means commands may run indefinitely.
    pub command_timeout_secs: Option<u64>,
    pub output_limit_bytes: usize,
    /// Executor-level confirmation gate for destructive commands.
    pub confirmation_mode: bool,
    pub allow_user_feedback_pause: bool,
    pub confirm_before_complete: bool,
    pub manual_turn_progress: bool,
    pub completion_prompt_enabled: bool,
    pub completion_prompt_text: String,
    /// Regex patterns; when non-empty, only matching commands may run.
    pub allowlist: Vec<String>,
    /// Regex patterns; matching commands never run.
    pub denylist: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiSection::default(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            models: BTreeMap::new(),
            reasoning_effort: None,
            request_timeout_secs: 60,
            context_char_budget: 24_000,
            system_prompt: None,
            shell: None,
            max_steps: 20,
            cwd: None,
            log_dir: PathBuf::from("logs"),
            safety_mode: SafetyMode::Prompt,
            elevate: false,
            dry_run: false,
            command_timeout_secs: Some(300),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            confirmation_mode: true,
            allow_user_feedback_pause: false,
            confirm_before_complete: false,
            manual_turn_progress: false,
            completion_prompt_enabled: true,
            completion_prompt_text: DEFAULT_CONTINUATION_PROMPT.to_string(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            bail!("max_steps must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be > 0");
        }
        if self.command_timeout_secs == Some(0) {
            bail!("command_timeout_secs must be > 0 when set");
        }
        if self.context_char_budget > 0 && self.context_char_budget < MIN_WINDOW_CHARS {
            bail!(
                "context_char_budget must be <= 0 (no context) or >= {MIN_WINDOW_CHARS}"
            );
        }
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        Guardrails::from_patterns(&self.allowlist, &self.denylist)?;
        Ok(())
    }

    pub fn effective_api_key(&self) -> Option<&str> {
        non_empty(self.openai.api_key.as_deref()).or_else(|| non_empty(self.api_key.as_deref()))
    }

    pub fn effective_api_url(&self) -> &str {
        non_empty(self.openai.api_url.as_deref()).unwrap_or(DEFAULT_API_URL)
    }

    /// Explicit setting, then the `[models]` entry, then the family default.
    pub fn effective_reasoning_effort(&self) -> Option<String> {
        non_empty(self.reasoning_effort.as_deref())
            .or_else(|| {
                self.models
                    .get(&self.model)
                    .and_then(|entry| non_empty(entry.reasoning_effort.as_deref()))
            })
            .map(str::to_string)
            .or_else(|| default_reasoning_effort(&self.model).map(str::to_string))
    }

    /// Configured shell with aliases resolved; platform default when unset.
    pub fn effective_shell(&self) -> String {
        match non_empty(self.shell.as_deref()) {
            Some(shell) => resolve_shell_alias(shell),
            None => default_shell_name().to_string(),
        }
    }

    pub fn continuation_prompt(&self) -> Option<&str> {
        if !self.completion_prompt_enabled {
            return None;
        }
        Some(non_empty(Some(self.completion_prompt_text.as_str())).unwrap_or(DEFAULT_CONTINUATION_PROMPT))
    }
}

/// Reasoning effort for model families that accept one.
pub fn default_reasoning_effort(model: &str) -> Option<&'static str> {
    let model = model.trim().to_ascii_lowercase();
    let reasoning_family = model.starts_with("gpt-5")
        || model
            .strip_prefix('o')
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
    reasoning_family.then_some("medium")
}

/// Map shell aliases onto adapter names: `pwsh` → `powershell`, `sh`/`shell` → `bash`.
pub fn resolve_shell_alias(shell: &str) -> String {
    let normalized = shell.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "pwsh" => "powershell".to_string(),
        "sh" | "shell" => "bash".to_string(),
        _ => normalized,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Load configuration files without environment overrides.
///
/// With `explicit`, that file must exist and is the only source. Otherwise
/// `terminalai.toml` and `terminalai.local.toml` under `dir` are merged; either
/// may be missing.
pub fn load_config(dir: &Path, explicit: Option<&Path>) -> Result<AppConfig> {
    let table = match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("config file not found: {}", path.display());
            }
            read_table(path)?
        }
        None => {
            let mut base = read_table_if_exists(&dir.join(CONFIG_FILE))?;
            let local = read_table_if_exists(&dir.join(LOCAL_CONFIG_FILE))?;
            merge_tables(&mut base, local);
            base
        }
    };
    let cfg: AppConfig = toml::Value::Table(table)
        .try_into()
        .context("parse configuration")?;
    Ok(cfg)
}

fn read_table_if_exists(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    read_table(path)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    debug!(path = %path.display(), "reading config file");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Deep-merge `overlay` into `base`; nested tables merge, other values replace.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `TERMINALAI_*` overrides read through `lookup`.
///
/// Empty values are ignored, as are integers that are not positive. Booleans
/// accept `1/true/yes/on` and `0/false/no/off`.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = get("TERMINALAI_OPENAI_API_KEY").or_else(|| get("TERMINALAI_API_KEY")) {
        cfg.openai.api_key = Some(key);
    }
    if let Some(url) = get("TERMINALAI_API_URL") {
        cfg.openai.api_url = Some(url);
    }
    if let Some(model) = get("TERMINALAI_MODEL") {
        cfg.model = model;
    }
    if let Some(effort) = get("TERMINALAI_REASONING_EFFORT") {
        cfg.reasoning_effort = Some(effort);
    }
    if let Some(dir) = get("TERMINALAI_LOG_DIR") {
        cfg.log_dir = PathBuf::from(dir);
    }
    if let Some(prompt) = get("TERMINALAI_SYSTEM_PROMPT") {
        cfg.system_prompt = Some(prompt);
    }
    if let Some(shell) = get("TERMINALAI_SHELL") {
        cfg.shell = Some(shell);
    }
    if let Some(cwd) = get("TERMINALAI_CWD") {
        cfg.cwd = Some(PathBuf::from(cwd));
    }
    if let Some(steps) = get("TERMINALAI_MAX_STEPS").and_then(|v| positive::<u32>(&v)) {
        cfg.max_steps = steps;
    }
    if let Some(budget) = get("TERMINALAI_CONTEXT_CHAR_BUDGET").and_then(|v| positive::<i64>(&v)) {
        cfg.context_char_budget = budget;
    }
    if let Some(secs) = get("TERMINALAI_COMMAND_TIMEOUT_SECS").and_then(|v| positive::<u64>(&v)) {
        cfg.command_timeout_secs = Some(secs);
    }
    if let Some(secs) = get("TERMINALAI_REQUEST_TIMEOUT_SECS").and_then(|v| positive::<u64>(&v)) {
        cfg.request_timeout_secs = secs;
    }
    if let Some(mode) = get("TERMINALAI_SAFETY_MODE") {
        cfg.safety_mode = mode
            .parse()
            .map_err(|err: String| anyhow!("TERMINALAI_SAFETY_MODE: {err}"))?;
    }
    if parse_bool(get("TERMINALAI_ALLOW_UNSAFE").as_deref()) == Some(true) {
        cfg.safety_mode = SafetyMode::AllowUnsafe;
    }
    if let Some(text) = get("TERMINALAI_COMPLETION_PROMPT_TEXT") {
        cfg.completion_prompt_text = text;
    }

    let flags: [(&str, &mut bool); 7] = [
        ("TERMINALAI_ELEVATE", &mut cfg.elevate),
        ("TERMINALAI_DRY_RUN", &mut cfg.dry_run),
        ("TERMINALAI_ALLOW_USER_FEEDBACK_PAUSE", &mut cfg.allow_user_feedback_pause),
        ("TERMINALAI_CONFIRM_BEFORE_COMPLETE", &mut cfg.confirm_before_complete),
        ("TERMINALAI_MANUAL_TURN_PROGRESS", &mut cfg.manual_turn_progress),
        ("TERMINALAI_COMPLETION_PROMPT_ENABLED", &mut cfg.completion_prompt_enabled),
        ("TERMINALAI_CONFIRMATION_MODE", &mut cfg.confirmation_mode),
    ];
    for (key, slot) in flags {
        if let Some(value) = parse_bool(get(key).as_deref()) {
            *slot = value;
        }
    }
    Ok(())
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn positive<T>(value: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value.parse::<T>().ok().filter(|parsed| *parsed > T::default())
}
