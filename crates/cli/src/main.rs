//! zipspool - deliver zip containers from a spool directory as events

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use zipspool_core::Config;

mod commands;
mod logging;
mod sink;

use commands::{cmd_config_check, cmd_config_template, cmd_run};
use logging::{init_cli_logging, init_run_logging};

#[derive(Parser)]
#[command(name = "zipspool")]
#[command(about = "Deliver single-entry zip containers from a spool directory as events")]
#[command(after_help = "\
QUICK START:
  zipspool config template > zipspool.toml   # Write a default config
  zipspool config check -c zipspool.toml     # Validate it
  zipspool run -c zipspool.toml              # Events as JSON lines on stdout")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `zipspool config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Print a configuration template with all defaults
  Template {
    /// Spool directory to put in the template
    #[arg(long, default_value = "/var/spool/zipspool")]
    spool_dir: String,
  },

  /// Validate a configuration file
  Check {
    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Consume the spool directory until ctrl-c
  #[command(long_about = "Consume the spool directory until ctrl-c.\n\n\
    Every event is written as one JSON object per line. Exits with status 1\n\
    when the source stops on an unrecoverable error.")]
  Run {
    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
    /// Append events to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run { config, output } => {
      let config = Config::load(&config).with_context(|| format!("Failed to load {}", config.display()))?;
      // Keep the guard alive so buffered log lines are flushed on exit
      let _guard = init_run_logging(&config.log);
      cmd_run(config, output).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Template { spool_dir } => cmd_config_template(&spool_dir),
        ConfigCommand::Check { config } => cmd_config_check(&config),
      }
    }
  }
}
