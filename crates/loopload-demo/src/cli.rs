//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::logging;
use crate::run;

/// Demo host commands.
#[derive(Clone, Copy, Debug, Subcommand)]
enum Command {
    /// Keep a value warm until the process is stopped.
    Run,
}

/// Runs a self-refreshing value inside a long lived process.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    logging::init_logging(&config);
    if let Some(ref statsd) = config.metrics.statsd {
        let tags = config.metrics.custom_tags.clone();
        loopload::metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => run::run(config).context("demo failed")?,
    }

    Ok(())
}
