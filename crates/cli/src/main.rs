//! storyhelm CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write a default config
//! - `context`: Print the context a consultation would see
//! - `consult`: Run one consultation against a story file
//! - `write`: Let a writer model continue the story, steered on interval

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "storyhelm",
    about = "storyhelm: autonomous narrative steering for AI co-writing",
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
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Print the assembled consultation context for a story
    Context {
        /// Story file (JSON)
        #[arg(short, long)]
        story: PathBuf,
    },

    /// Run one consultation and save the new instruction into the story
    Consult {
        /// Story file (JSON)
        #[arg(short, long)]
        story: PathBuf,
    },

    /// Continue the story with the writer model, steering on interval
    Write {
        /// Story file (JSON)
        #[arg(short, long)]
        story: PathBuf,

        /// Number of paragraphs to generate
        #[arg(short, long, default_value_t = 8)]
        generations: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
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
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Context { story } => commands::context::run(&story).await?,
        Commands::Consult { story } => commands::consult::run(&story).await?,
        Commands::Write { story, generations } => commands::write::run(&story, generations).await?,
    }

    Ok(())
}
