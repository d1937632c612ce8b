//! Lorebook CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize config directory & default config
//! - `ask`     — Run one retrieval-augmented query from the terminal
//! - `serve`   — Start the HTTP gateway
//! - `doctor`  — Diagnose configuration and collaborator health

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lorebook",
    about = "Lorebook — retrieval-augmented chat service",
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
    /// Initialize configuration
    Onboard,

    /// Ask a single question
    Ask {
        /// The question to ask
        query: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Stream the reply as it is generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Diagnose configuration and collaborator health
    Doctor,
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
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Ask {
            query,
            conversation,
            stream,
        } => commands::ask::run(&query, conversation.as_deref(), stream).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
