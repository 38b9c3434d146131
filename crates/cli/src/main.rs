//! fundwise CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway
//! - `ask`     Run one session and render its stream in the terminal
//! - `config`  Show, validate or initialise the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "fundwise",
    about = "fundwise: streaming tool-calling assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "FUNDWISE_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question
    Ask {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Print the raw stream records as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show and validate the configuration
    Config {
        /// Write a starter config file if none exists
        #[arg(long)]
        init: bool,

        /// Print the config file path only
        #[arg(long, conflicts_with = "init")]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask { message, json } => commands::ask::run(message, json).await?,
        Commands::Config { init: true, .. } => commands::config_cmd::init().await?,
        Commands::Config { path: true, .. } => commands::config_cmd::path().await?,
        Commands::Config { .. } => commands::config_cmd::show().await?,
    }

    Ok(())
}
