//! Terminal AI assistant.
//!
//! Works toward a natural-language goal by asking a remote model for one shell
//! command at a time, running it under guardrails, and feeding the result back.
//! Every turn is appended to `<log_dir>/session-YYYY-MM-DD.jsonl`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use terminalai::agent_loop::{AgentLoop, LoopConfig, LoopStop};
use terminalai::collaborators::Collaborators;
use terminalai::core::types::{SafetyMode, SessionTurn};
use terminalai::exit_codes;
use terminalai::io::channel::{ChannelConfig, HttpDecisionChannel};
use terminalai::io::config::{AppConfig, CONFIG_FILE_ENV, apply_env_overrides, load_config};
use terminalai::io::console::ConsolePrompter;
use terminalai::io::session_log::SessionLog;
use terminalai::io::shell::{ElevationEnv, Guardrails, create_shell_adapter};
use terminalai::logging;

const RETRY_NOTICE: &str =
    "No command was proposed. Enter an instruction to retry, or press Enter to quit.";

#[derive(Parser, Debug)]
#[command(name = "terminalai", version, about = "Terminal AI assistant")]
struct Cli {
    /// Goal to work toward; asked for interactively when omitted.
    goal: Vec<String>,
    /// Working directory commands start in.
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Shell adapter: bash, sh, cmd or powershell.
    #[arg(long)]
    shell: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Maximum decision round-trips per run.
    #[arg(long)]
    max_steps: Option<u32>,
    /// Destructive-command policy: prompt, allow_unsafe or off.
    #[arg(long)]
    safety: Option<SafetyMode>,
    /// Report commands without running them.
    #[arg(long)]
    dry_run: bool,
    /// Run commands elevated (sudo, or UAC on Windows).
    #[arg(long)]
    elevate: bool,
    /// Config file replacing terminalai.toml and terminalai.local.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init();

    let cfg = resolve_config(&cli)?;
    let working_directory = resolve_working_directory(cfg.cwd.as_deref())?;

    let guardrails = Guardrails::from_patterns(&cfg.allowlist, &cfg.denylist)?
        .with_confirmation_mode(cfg.confirmation_mode);
    let shell = create_shell_adapter(&cfg.effective_shell())?
        .with_guardrails(guardrails)
        .with_elevation(cfg.elevate)
        .with_elevation_env(ElevationEnv::detect())
        .with_output_limit(cfg.output_limit_bytes);

    let api_key = cfg.effective_api_key().map(str::to_string);
    if api_key.is_none() {
        warn!("no API key configured; decision requests will be rejected");
    }
    let channel = HttpDecisionChannel::new(ChannelConfig {
        api_url: cfg.effective_api_url().to_string(),
        api_key,
        model: cfg.model.clone(),
        reasoning_effort: cfg.effective_reasoning_effort(),
        timeout: Duration::from_secs(cfg.request_timeout_secs),
        context_char_budget: cfg.context_char_budget,
        allow_user_questions: cfg.allow_user_feedback_pause,
        safety_mode: cfg.safety_mode,
        extra_instructions: cfg.system_prompt.clone(),
    })?;

    let prompter = ConsolePrompter::stdio();
    let mut collaborators = Collaborators::default().with_confirm_command(&prompter);
    if cfg.allow_user_feedback_pause {
        collaborators = collaborators.with_request_feedback(&prompter);
    }
    if cfg.manual_turn_progress {
        collaborators = collaborators.with_turn_progress(&prompter);
    }
    if cfg.confirm_before_complete {
        collaborators = collaborators.with_confirm_completion(&prompter);
    }

    let mut goal = match initial_goal(&cli) {
        Some(goal) => goal,
        None => match prompter.ask("Goal: ") {
            Some(goal) if !goal.trim().is_empty() => goal.trim().to_string(),
            _ => bail!("no goal provided"),
        },
    };

    let loop_config = LoopConfig {
        max_steps: cfg.max_steps,
        safety_mode: cfg.safety_mode,
        working_directory: Some(working_directory),
        command_timeout: cfg.command_timeout_secs.map(Duration::from_secs),
        dry_run: cfg.dry_run,
        confirm_before_complete: cfg.confirm_before_complete,
        continuation_prompt: cfg.continuation_prompt().map(str::to_string),
        model: cfg.model.clone(),
    };

    let mut history: Vec<SessionTurn> = Vec::new();
    loop {
        info!(goal = %goal, history = history.len(), "starting run");
        let outcome = AgentLoop::new(&channel, &shell, loop_config.clone())
            .with_collaborators(collaborators)
            .with_history(&history)
            .with_session_log(SessionLog::new(&cfg.log_dir))
            .run(&goal);

        for turn in &outcome.turns {
            history.push(turn.clone());
            prompter.say(&render_turn(history.len(), turn));
        }

        match follow_up(&outcome.stop, loop_config.continuation_prompt.is_some()) {
            FollowUp::Exit(code) => return Ok(code),
            FollowUp::Ask { notice } => {
                if let Some(notice) = notice {
                    prompter.say(notice);
                }
                match prompter.ask("> ") {
                    Some(next) if !next.trim().is_empty() => goal = next.trim().to_string(),
                    _ => return Ok(exit_codes::OK),
                }
            }
        }
    }
}

/// What the binary does once a run stops.
#[derive(Debug, PartialEq, Eq)]
enum FollowUp {
    Exit(i32),
    /// Read a new instruction, printing `notice` first.
    Ask { notice: Option<&'static str> },
}

fn follow_up(stop: &LoopStop, continuation_enabled: bool) -> FollowUp {
    match stop {
        LoopStop::StepBudgetExhausted { .. } => FollowUp::Exit(exit_codes::BUDGET_EXHAUSTED),
        // Channel failures land here as safe decisions; let the user retry.
        LoopStop::Finished => FollowUp::Ask {
            notice: Some(RETRY_NOTICE),
        },
        LoopStop::GoalComplete if continuation_enabled => FollowUp::Ask { notice: None },
        LoopStop::GoalComplete | LoopStop::AwaitingUser | LoopStop::Aborted => {
            FollowUp::Exit(exit_codes::OK)
        }
    }
}

/// Defaults, config files, `TERMINALAI_*` variables, then flags.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let base_dir = env::current_dir().context("resolve current directory")?;
    let explicit = cli
        .config
        .clone()
        .or_else(|| env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));
    let mut cfg = load_config(&base_dir, explicit.as_deref())?;
    apply_env_overrides(&mut cfg, |key| env::var(key).ok())?;

    if let Some(cwd) = &cli.cwd {
        cfg.cwd = Some(cwd.clone());
    }
    if let Some(shell) = &cli.shell {
        cfg.shell = Some(shell.clone());
    }
    if let Some(model) = &cli.model {
        cfg.model = model.clone();
    }
    if let Some(max_steps) = cli.max_steps {
        cfg.max_steps = max_steps;
    }
    if let Some(safety) = cli.safety {
        cfg.safety_mode = safety;
    }
    cfg.dry_run |= cli.dry_run;
    cfg.elevate |= cli.elevate;

    cfg.validate()?;
    Ok(cfg)
}

fn resolve_working_directory(configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(dir) if dir.is_dir() => Ok(dir.to_path_buf()),
        Some(dir) => bail!("Invalid configured cwd directory: {}", dir.display()),
        None => env::current_dir().context("resolve current directory"),
    }
}

fn initial_goal(cli: &Cli) -> Option<String> {
    let goal = cli.goal.join(" ");
    let goal = goal.trim();
    (!goal.is_empty()).then(|| goal.to_string())
}

fn render_turn(index: usize, turn: &SessionTurn) -> String {
    let mut buf = String::new();
    if !turn.command.is_empty() {
        buf.push_str(&format!("[{index}] $ {}\n{}\n", turn.command, turn.output.trim_end()));
    }
    if let Some(hint) = turn.next_action_hint.as_deref().filter(|h| !h.trim().is_empty()) {
        if buf.is_empty() {
            buf.push_str(&format!("[{index}] "));
        }
        buf.push_str(hint.trim_end());
        buf.push('\n');
    }
    buf
}
