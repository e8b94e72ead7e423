//! Quarry CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP/SSE gateway
//! - `ask`     Run one message and print the stream
//! - `config`  Print the default config, its path, or validate it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Quarry: streaming LLM and tool orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send a single message and stream the run to the terminal
    Ask {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// JSON file holding prior turns of the conversation
        #[arg(long)]
        history: Option<std::path::PathBuf>,

        /// Bearer token forwarded to the tool service
        #[arg(long, env = "QUARRY_TOOL_TOKEN")]
        token: Option<String>,
    },

    /// Show configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,

        /// Load and validate the config file
        #[arg(long, conflicts_with = "path")]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            message,
            history,
            token,
        } => commands::ask::run(message, history, token).await?,
        Commands::Config { path, validate } => {
            if path {
                commands::config_cmd::path()?
            } else if validate {
                commands::config_cmd::validate()?
            } else {
                commands::config_cmd::show_default()?
            }
        }
    }

    Ok(())
}
