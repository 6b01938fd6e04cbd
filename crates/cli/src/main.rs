mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tidemark_core::{init_logging, AppConfig, LoggingConfig};

use commands::migrate;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(version, about = "Database schema migrations for PostgreSQL")]
struct Cli {
    /// Configuration file (defaults to ./tidemark.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit log records as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Create a new migration file
    Make {
        /// Migration name, e.g. create_users_table
        name: Option<String>,
    },

    /// Run pending migrations
    Run,

    /// Roll back the last batch, or the last N migrations with --step
    Rollback {
        /// Number of migrations to roll back
        #[arg(long, allow_hyphen_values = true)]
        step: Option<String>,
    },

    /// Roll back every applied migration
    Reset,

    /// Show migration status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_error_status(&e));
        }
    };

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `--help` and `--version` succeed; every usage error is a plain failure
fn parse_error_status(err: &clap::Error) -> u8 {
    if err.exit_code() == 0 {
        0
    } else {
        1
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    let logging = if cli.log_json {
        LoggingConfig::json(&level)
    } else {
        LoggingConfig::cli(&level)
    };
    init_logging(&logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let mut sources: Vec<_> = config.config_sources().into_iter().collect();
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, source) in sources {
        tracing::debug!(setting = %key, source = %source, "Configuration");
    }

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Make { name } => {
                migrate::make(&config, name.as_deref())?;
            }
            MigrateCommands::Run => {
                migrate::run(&config).await?;
            }
            MigrateCommands::Rollback { step } => {
                migrate::rollback(&config, step.as_deref()).await?;
            }
            MigrateCommands::Reset => {
                migrate::reset(&config).await?;
            }
            MigrateCommands::Status { json } => {
                migrate::status(&config, json).await?;
            }
        },
    }

    Ok(())
}
