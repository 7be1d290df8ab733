//! cycle-bench - Cycle-driven load generation engine

use anyhow::Result;
use clap::Parser;

mod cli;
mod workload;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => cli::run(args),
        Commands::Validate { config } => cli::validate(&config),
    }
}
