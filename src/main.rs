use anyhow::Result;
use clap::Parser;

use agent_console::attach;
use agent_console::config::{Cli, Commands, QuickstartArgs, ServerArgs};
use agent_console::coordinator::{CoordinatorClient, SessionCredentials};
use agent_console::format::AgentType;
use agent_console::logging::init_logging;
use agent_console::server;
use agent_console::session::{AgentSession, SessionConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = match &cli.command {
        Commands::Server(args) => args.log_level.clone(),
        Commands::Quickstart(args) => args.log_level.clone(),
        Commands::Attach(args) => args.log_level.clone(),
    };
    if let Err(error) = init_logging(&log_level) {
        eprintln!("failed to initialize logging: {error:#}");
    }

    let result = match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Quickstart(args) => run_quickstart(args).await,
        Commands::Attach(args) => attach::run(&args.url).await,
    };

    if let Err(error) = result {
        tracing::error!(error = format!("{error:#}"), "exiting on fatal error");
        std::process::exit(1);
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = args.session_config()?;
    let session = AgentSession::start(config)?;
    server::serve(session, args.port, args.auth_token.clone()).await
}

async fn run_quickstart(args: QuickstartArgs) -> Result<()> {
    let credentials = SessionCredentials::generate();
    tracing::info!(passcode = %credentials.passcode, "generated session credentials");

    let config = SessionConfig::new(AgentType::Claude, "claude");
    let session = AgentSession::start(config)?;

    // Tunnel provisioning is an external concern; the coordinator receives
    // the local URL, which a fronting tunnel can expose.
    let local_url = format!("http://localhost:{}", args.port);
    let coordinator = CoordinatorClient::from_env()?;
    coordinator
        .register(&credentials.passcode, &local_url, &credentials.token)
        .await?;

    print_connection_info(&credentials.passcode, args.port);
    server::serve(session, args.port, Some(credentials.token)).await
}

fn print_connection_info(passcode: &str, port: u16) {
    let rule = "=".repeat(70);
    println!("\n{rule}");
    println!("Agent session is ready");
    println!("{rule}");
    println!("  Mobile passcode: {passcode}");
    println!("  Local port:      {port}");
    println!("  Terminal attach: agent-console attach --url localhost:{port}");
    println!("  Session expires in 24 hours; press ctrl-c to stop.");
    println!("{rule}\n");
}
