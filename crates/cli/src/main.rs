//! Reflexa CLI — session driver for the agent runtime.
//!
//! Commands:
//! - `onboard` — Write the default config to `~/.reflexa/`
//! - `chat`    — Interactive or single-message chat
//! - `models`  — Show how each model purpose resolves

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "reflexa",
    about = "Reflexa — reflective LLM agent runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and show the agent's reasoning
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Model set to use (defaults to `default_model_set`)
        #[arg(long)]
        model_set: Option<String>,

        /// Memory collection to search and record into
        #[arg(long)]
        memory: Option<String>,

        /// Reply language (ISO 639-1)
        #[arg(long)]
        language: Option<String>,
    },

    /// Show purpose → model resolution for a model set
    Models {
        #[arg(long)]
        model_set: Option<String>,

        /// Also run each configured provider's health check
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            model_set,
            memory,
            language,
        } => {
            let options = commands::chat::ChatOptions {
                message,
                model_set,
                memory,
                language,
                show_reasoning: cli.verbose,
            };
            commands::chat::run(options).await?
        }
        Commands::Models { model_set, check } => commands::models::run(model_set, check).await?,
    }

    Ok(())
}
