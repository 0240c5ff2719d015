//! Command-line surface: `server`, `quickstart`, and `attach`.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::format::AgentType;
use crate::session::SessionConfig;

pub const DEFAULT_PORT: u16 = 3284;

#[derive(Debug, Parser)]
#[command(name = "agent-console")]
#[command(about = "HTTP API for terminal coding agents (Claude Code, Goose, Aider, Codex)")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an agent under a PTY and expose it over HTTP and SSE.
    Server(ServerArgs),
    /// Start Claude with an authenticated server and coordinator
    /// registration for mobile access.
    Quickstart(QuickstartArgs),
    /// Bridge the local terminal to a running server.
    Attach(AttachArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServerArgs {
    /// Agent type; determines prompt markers and output cleanup rules.
    #[arg(value_enum, default_value_t = AgentType::Claude)]
    pub agent: AgentType,

    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Binary to launch; defaults to the agent's own name. Required for
    /// `custom`.
    #[arg(long)]
    pub program: Option<String>,

    #[arg(long, default_value_t = 30)]
    pub rows: u16,

    #[arg(long, default_value_t = 120)]
    pub cols: u16,

    /// Bearer token required on authenticated endpoints. No token disables
    /// auth.
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Accept user submissions while the agent is still producing output
    /// instead of rejecting them with 409.
    #[arg(long, default_value_t = false)]
    pub submit_while_busy: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Extra arguments passed to the agent binary.
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl ServerArgs {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let program = match (&self.program, self.agent.default_program()) {
            (Some(program), _) => program.clone(),
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                anyhow::bail!("--program is required when agent type is 'custom'")
            }
        };
        let mut config = SessionConfig::new(self.agent, program);
        config.args = self.args.clone();
        config.rows = self.rows;
        config.cols = self.cols;
        config.allow_busy_submissions = self.submit_while_busy;
        Ok(config)
    }
}

#[derive(Debug, Args, Clone)]
pub struct QuickstartArgs {
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Args, Clone)]
pub struct AttachArgs {
    /// Server address, host:port or full URL.
    #[arg(long, default_value = "localhost:3284")]
    pub url: String,

    #[arg(long, default_value = "warn")]
    pub log_level: String,
}
