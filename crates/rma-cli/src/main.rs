mod cmd;
mod settings;

use clap::{Parser, Subcommand};
use cmd::{
    chat::ChatArgs, config::ConfigSubcommand, orchestrator::OrchestratorArgs, serve::ServeArgs,
    session_manager::SessionManagerArgs,
};

#[derive(Parser)]
#[command(
    name = "rma",
    about = "Release manager assistant relay: chat sessions in, agent answers out",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept chat WebSocket connections and relay them to the orchestrator
    SessionManager(SessionManagerArgs),

    /// Run agent workers that answer queued requests
    Orchestrator(OrchestratorArgs),

    /// Run the session manager and workers in one process
    Serve(ServeArgs),

    /// Chat with a running session manager from the terminal
    Chat(ChatArgs),

    /// Inspect the agent runtime config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    load_dotenv();
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::SessionManager(_) | Commands::Orchestrator(_) | Commands::Serve(_) => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::SessionManager(args) => cmd::session_manager::run(args),
        Commands::Orchestrator(args) => cmd::orchestrator::run(args),
        Commands::Serve(args) => cmd::serve::run(args),
        Commands::Chat(args) => cmd::chat::run(args),
        Commands::Config { subcommand } => cmd::config::run(subcommand),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Local runs pick up `.env`; production relies on the real environment.
fn load_dotenv() {
    if std::env::var("ENVIRONMENT").is_ok_and(|v| v == "PROD") {
        return;
    }
    dotenvy::dotenv().ok();
}
