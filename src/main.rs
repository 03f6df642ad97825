use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod command;
mod context;
mod conversation;
mod diagnostics;
mod error;
mod generation;
mod impact;
mod progress;

/// AppForge CLI - streaming app generation with change analysis
#[derive(Parser)]
#[command(name = "appforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate or update an app from a natural-language instruction
    Generate {
        /// The instruction to submit
        instruction: String,

        /// Transcript JSON file with prior conversation turns
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Project the generation is billed against
        #[arg(short, long)]
        project: Option<String>,

        /// Select model to use (defaults to complexity-based selection)
        #[arg(short = 'm', long)]
        model: Option<String>,

        /// Previous generation output, diffed to pick a deploy strategy
        #[arg(long)]
        previous_dir: Option<PathBuf>,
    },
    /// Compare two file trees and pick a deployment strategy
    Analyze {
        /// Directory with the previous file set
        old_dir: PathBuf,

        /// Directory with the new file set
        new_dir: PathBuf,
    },
    /// Parse raw compiler output into structured diagnostics
    Diagnose {
        /// File with raw compiler output (reads stdin if absent)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Source tree used to attach code context to the fix request
        #[arg(long)]
        sources: Option<PathBuf>,
    },
    /// Save backend credentials and billing context
    Configure {
        /// Backend base URL
        #[arg(long, env = "APPFORGE_API_URL")]
        api_url: String,

        /// Backend access token
        #[arg(long, env = "APPFORGE_API_TOKEN")]
        access_token: String,

        /// Billing account id
        #[arg(long)]
        account: Option<String>,

        /// Billing identity
        #[arg(long)]
        identity: Option<String>,

        /// Billing project id
        #[arg(long)]
        project: Option<String>,
    },
    /// Segment a saved transcript into topic segments
    Transcript {
        /// Transcript JSON file
        file: PathBuf,
    },
    /// Show current configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Generate {
            instruction,
            transcript,
            project,
            model,
            previous_dir,
        }) => {
            command::run_generate(instruction, transcript, project, model, previous_dir).await?;
        }
        Some(Commands::Analyze { old_dir, new_dir }) => {
            command::run_analyze(old_dir, new_dir).await?;
        }
        Some(Commands::Diagnose { input, sources }) => {
            command::run_diagnose(input, sources).await?;
        }
        Some(Commands::Configure {
            api_url,
            access_token,
            account,
            identity,
            project,
        }) => {
            command::run_configure(api_url, access_token, account, identity, project).await?;
        }
        Some(Commands::Transcript { file }) => {
            command::run_transcript(file).await?;
        }
        Some(Commands::Status) => {
            command::run_status().await?;
        }
        None => {
            // No command specified, show help
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!("Use 'appforge generate \"<instruction>\"' to start a generation.");
        }
    }

    Ok(())
}
