pub mod chat;
pub mod check;
pub mod config;
pub mod run;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use sc_domain::config::{Config, PermissionMode};
use sc_permissions::pattern::policy_from_pattern;
use sc_permissions::Permission;
use sc_services::ServiceContainer;

use crate::runtime::ApprovalDecision;
use crate::services::{build_services, load_config, ConfigSource, SessionOverrides};

/// Config file used when neither `--config` nor `SC_CONFIG` is given.
const DEFAULT_CONFIG_FILE: &str = "serialcode.toml";

/// SerialCode: a terminal coding agent.
#[derive(Debug, Parser)]
#[command(name = "serialcode", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Serve one check task over stdin/stdout (used by `check`).
    #[arg(long = "internal-worker", hide = true)]
    pub internal_worker: bool,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Config file (default: $SC_CONFIG or ./serialcode.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Permission mode: normal, plan or auto.
    #[arg(long, global = true)]
    pub mode: Option<PermissionMode>,

    /// Allow a tool pattern, e.g. `Read` or `Bash(git *)`. Repeatable.
    #[arg(long = "allow", global = true, value_name = "PATTERN", value_parser = parse_pattern)]
    pub allow: Vec<String>,

    /// Always ask before a tool pattern. Repeatable.
    #[arg(long = "ask", global = true, value_name = "PATTERN", value_parser = parse_pattern)]
    pub ask: Vec<String>,

    /// Hide and refuse a tool pattern. Repeatable.
    #[arg(long = "exclude", global = true, value_name = "PATTERN", value_parser = parse_pattern)]
    pub exclude: Vec<String>,

    /// Never prompt; a call that needs approval fails the run.
    #[arg(long, global = true)]
    pub headless: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive session (default when no subcommand is given).
    Chat,
    /// Send a single message to the agent and print the response.
    Run {
        /// The message to send.
        message: String,
        /// Output the turn's events as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Run check agents on the current changes, each in an isolated
    /// worktree. Agents fix problems; their edits come back as patches.
    Check(CheckArgs),
    /// Run review agents on the current changes and print their findings.
    Review(CheckArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Agent to run: a name from the agents directory or a markdown file.
    /// Repeatable; default is every agent found.
    #[arg(long = "agent", value_name = "NAME_OR_PATH")]
    pub agents: Vec<String>,
    /// Branch or ref to diff against (default: main, then master).
    #[arg(long)]
    pub base: Option<String>,
    /// Maximum workers running at once.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Per-worker timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Run one agent at a time and stop at the first that does not pass.
    #[arg(long)]
    pub fail_fast: bool,
    /// Apply the patches agents produced to the working tree.
    #[arg(long)]
    pub fix: bool,
    /// Print the produced patches to stdout.
    #[arg(long)]
    pub patch: bool,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

fn parse_pattern(raw: &str) -> Result<String, String> {
    policy_from_pattern(raw, Permission::Allow)
        .map(|_| raw.to_owned())
        .map_err(|e| e.to_string())
}

// ── Config loading helpers ────────────────────────────────────────────

impl GlobalArgs {
    /// `--config`, then `SC_CONFIG`, then `./serialcode.toml`.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| std::env::var_os("SC_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn overrides(&self) -> SessionOverrides {
        SessionOverrides {
            mode: self.mode,
            allow: self.allow.clone(),
            ask: self.ask.clone(),
            exclude: self.exclude.clone(),
            headless: self.headless,
            workspace_root: None,
            denied_commands: Vec::new(),
        }
    }

    /// The config file with command-line overrides applied. Returns the
    /// config and the path that was used.
    pub fn load_config(&self) -> anyhow::Result<(Config, PathBuf)> {
        let path = self.config_path();
        let config = load_config(&path)?;
        Ok((self.overrides().apply(config), path))
    }

    /// Load and validate the config, then register the session services.
    pub fn services(&self) -> anyhow::Result<Arc<ServiceContainer>> {
        let (config, path) = self.load_config()?;
        if config.has_errors() {
            anyhow::bail!(
                "invalid configuration in {}; run `serialcode config validate` for details",
                path.display()
            );
        }
        Ok(build_services(ConfigSource::File(path), self.overrides())?)
    }
}

// ── Approval prompt ───────────────────────────────────────────────────

/// Ask on stderr whether a tool call may run and read the answer from
/// stdin. Anything but yes/always (including EOF) denies.
pub async fn prompt_approval(display: &str, pattern: &str) -> ApprovalDecision {
    eprintln!("\x1b[33mAllow {display}?\x1b[0m [y]es / [a]lways allow {pattern} / [n]o");
    eprint!("> ");
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await;
    match answer {
        Ok(Ok(line)) => parse_decision(&line),
        _ => ApprovalDecision::Deny,
    }
}

pub fn parse_decision(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Once,
        "a" | "always" => ApprovalDecision::Always,
        _ => ApprovalDecision::Deny,
    }
}
