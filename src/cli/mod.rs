//! CLI argument parsing and command dispatch

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cycle_bench_core::{ActivityConfig, CycleRange, RateSpec};

mod run;

pub use run::run;

#[derive(Parser)]
#[command(name = "cycle-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an activity against the simulated driver
    Run(RunArgs),
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Dispatch path of the simulated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Run every cycle on its motor thread
    Sync,
    /// Complete cycles on a tokio runtime
    Async,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a JSON activity configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Activity alias
    #[arg(long)]
    pub alias: Option<String>,

    /// Number of motor threads
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Cycles per stride
    #[arg(long)]
    pub stride: Option<usize>,

    /// Cycle range, `N` or `A..B`
    #[arg(long)]
    pub cycles: Option<CycleRange>,

    /// Cycle rate, `ops` or `ops,burst`
    #[arg(long)]
    pub cyclerate: Option<RateSpec>,

    /// Stride rate, `ops` or `ops,burst`
    #[arg(long)]
    pub striderate: Option<RateSpec>,

    /// In-flight async ops per motor
    #[arg(long)]
    pub max_pending: Option<usize>,

    /// Attempts per op, including the first
    #[arg(long)]
    pub max_tries: Option<u32>,

    /// Error handler rules, e.g. `NotApplied=stop;*=retry,warn`
    #[arg(long)]
    pub errors: Option<String>,

    /// Simulated action kind
    #[arg(long, value_enum, default_value_t = Mode::Async)]
    pub mode: Mode,

    /// Mean simulated op latency in milliseconds
    #[arg(long, default_value_t = 2)]
    pub latency_ms: u64,

    /// Random extra latency in milliseconds
    #[arg(long, default_value_t = 2)]
    pub jitter_ms: u64,

    /// Probability that a simulated attempt fails
    #[arg(long, default_value_t = 0.0)]
    pub fail_rate: f64,

    /// Cycle whose op reports an unapplied conditional write
    #[arg(long)]
    pub not_applied_cycle: Option<u64>,

    /// Stop the activity after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command-line overrides on top of `config`
    pub fn apply(&self, mut config: ActivityConfig) -> ActivityConfig {
        if let Some(alias) = &self.alias {
            config.alias = alias.clone();
        }
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        if let Some(stride) = self.stride {
            config = config.with_stride(stride);
        }
        if let Some(cycles) = self.cycles {
            config = config.with_cycles(cycles);
        }
        if let Some(rate) = self.cyclerate {
            config = config.with_cyclerate(rate);
        }
        if let Some(rate) = self.striderate {
            config = config.with_striderate(rate);
        }
        if let Some(max_pending) = self.max_pending {
            config = config.with_max_pending(max_pending);
        }
        if let Some(max_tries) = self.max_tries {
            config = config.with_max_tries(max_tries);
        }
        if let Some(errors) = &self.errors {
            config = config.with_errors(errors.clone());
        }
        config
    }
}

/// Load an activity configuration, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<ActivityConfig> {
    let Some(path) = path else {
        return Ok(ActivityConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Check a configuration file and print it normalized
pub fn validate(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::info!(alias = %config.alias, "Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_override_config() {
        let cli = Cli::parse_from([
            "cycle-bench",
            "run",
            "--threads",
            "8",
            "--cycles",
            "10..20",
            "--cyclerate",
            "50,5",
            "--mode",
            "sync",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Mode::Sync);

        let config = args.apply(ActivityConfig::default());
        assert_eq!(config.threads, 8);
        assert_eq!(config.cycles, CycleRange::new(10, 20));
        assert_eq!(config.cyclerate, Some(RateSpec::new(50.0).with_burst(5)));
        assert_eq!(config.max_pending, 100);
    }

    #[test]
    fn test_rejects_bad_rate() {
        let result = Cli::try_parse_from(["cycle-bench", "run", "--cyclerate", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config.alias, ActivityConfig::default().alias);
    }
}
