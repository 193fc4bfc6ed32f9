// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Autodev main entry point - CLI and process lifecycle.
//!
//! Exit codes: 0 on normal completion, 1 on a fatal initialization error,
//! 130 when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use autodev::config::{self, OrchestratorConfig};
use autodev::orchestrator::Orchestrator;
use autodev::telemetry::{init_telemetry, TelemetryGuard};

/// Autodev - an autonomous AI development team.
#[derive(Parser)]
#[command(name = "autodev")]
#[command(author, version, about = "Autonomous AI development team", long_about = None)]
struct Cli {
    /// Directory holding the configuration file (defaults to the current
    /// directory)
    #[arg(short = 'C', long, env = "AUTODEV_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for autodev.
#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until interrupted
    Start,

    /// Run a single reconciliation tick and exit
    Sync,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Write an example configuration file
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let home = cli
        .home
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    match run(cli, &home).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, home: &std::path::Path) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Version => {
            println!("autodev {}", autodev::VERSION);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = config::load_config(home)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Init => {
                let path = config::save_config(home, &config::get_example_config(), None)?;
                println!("{} {}", "wrote".green(), path.display());
                Ok(ExitCode::SUCCESS)
            }
        },

        Commands::Sync => {
            let (config, _guard) = load_and_init(home)?;
            let orchestrator = Orchestrator::with_forge_backend(&config)?;
            let summary = orchestrator.force_sync().await?;
            println!(
                "{} examined {} item(s), submitted {} request(s), {} error(s)",
                "sync:".green().bold(),
                summary.examined,
                summary.submitted,
                summary.item_errors
            );
            orchestrator.stop().await;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Start => {
            let (config, _guard) = load_and_init(home)?;
            let orchestrator = Orchestrator::with_forge_backend(&config)?;
            orchestrator.start();
            println!(
                "{} watching board {} (ctrl-c to stop)",
                "autodev:".green().bold(),
                config.planner.board_id
            );

            tokio::signal::ctrl_c().await?;
            println!("\n{}", "shutting down...".yellow());
            orchestrator.stop().await;
            Ok(ExitCode::from(130))
        }
    }
}

/// Load + validate configuration and bring up telemetry.
///
/// The returned guard must stay alive for the life of the process.
fn load_and_init(home: &std::path::Path) -> anyhow::Result<(OrchestratorConfig, TelemetryGuard)> {
    let config = config::load_config(home)?;
    let guard = init_telemetry(&config.logger)?;
    Ok((config, guard))
}
