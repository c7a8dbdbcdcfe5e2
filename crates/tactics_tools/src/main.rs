//! Tactics - Development Tools

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tactics-tools")]
#[command(about = "Development tools for the tactics placement core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate data files
    Validate {
        /// Path to data directory
        #[arg(default_value = "assets/data")]
        path: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect recorded replays
    Replay {
        #[command(subcommand)]
        command: ReplayCommands,
    },
}

#[derive(Subcommand)]
enum ReplayCommands {
    /// Print what a replay file contains
    Info {
        /// Replay file
        file: PathBuf,
    },
    /// Play a replay back and compare its final state hash
    Verify {
        /// Replay file
        file: PathBuf,
    },
}

fn run(command: Commands) -> tactics_tools::Result<bool> {
    match command {
        Commands::Validate { path, json } => {
            tracing::info!("Validating data files in: {}", path.display());
            let report = tactics_tools::validate::validate_data_directory(&path)?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                for file in &report.files {
                    for problem in &file.problems {
                        tracing::error!(file = %file.path, "{problem}");
                    }
                }
                for problem in &report.cross_file {
                    tracing::error!("{problem}");
                }
            }
            report.into_result()?;
            tracing::info!("Validation passed");
            Ok(true)
        }
        Commands::Replay {
            command: ReplayCommands::Info { file },
        } => {
            let summary = tactics_tools::replay::summarize_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(true)
        }
        Commands::Replay {
            command: ReplayCommands::Verify { file },
        } => {
            let verification = tactics_tools::replay::verify_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(verification.matches)
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
