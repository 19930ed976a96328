use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use compound_cli::{run, Cli, CompoundConfig, Outcome};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        CompoundConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(filter) = &cli.log_filter {
        config.log_filter = filter.clone();
    }

    compound_monitoring::init_logging(&config.monitoring_config())
        .context("Failed to initialize logging")?;

    let stdout = io::stdout();
    let outcome = run(&cli.command, &config, &mut stdout.lock())?;
    Ok(match outcome {
        Outcome::Clean => ExitCode::SUCCESS,
        Outcome::Problems => ExitCode::FAILURE,
    })
}
