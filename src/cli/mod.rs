//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::models::BackoffStrategy;
use crate::utils::LogLevel;

/// Concurrent test runner with retries, timeouts and result caching
#[derive(Parser, Debug)]
#[command(name = "testflow")]
#[command(version)]
#[command(about = "Run test suites on a bounded worker pool")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Profile to apply (ci, smoke, debug, or file-defined)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

impl Args {
    /// Resolve the log level from `--log-level`, falling back to `verbose`
    pub fn log_level(&self, verbose: bool) -> Result<LogLevel> {
        match &self.log_level {
            Some(name) => {
                LogLevel::from_str(name).with_context(|| format!("Unknown log level: {name}"))
            }
            None if verbose => Ok(LogLevel::Debug),
            None => Ok(LogLevel::Info),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a test suite
    Run(RunArgs),

    /// List the tests of a suite
    List(ListArgs),

    /// Inspect or create configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite file (YAML or JSON)
    #[arg(short, long)]
    pub suite: PathBuf,

    /// Maximum concurrent tests
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-attempt timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Retry budget per test
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Backoff strategy between retries (linear, exponential)
    #[arg(long)]
    pub backoff: Option<String>,

    /// Base backoff delay in milliseconds
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Stop dispatching after the first failure
    #[arg(short, long)]
    pub bail: bool,

    /// Always execute, ignoring cached passes
    #[arg(long)]
    pub no_cache: bool,

    /// Sample resource usage during each test
    #[arg(short, long)]
    pub metrics: bool,

    /// Only run tests with this tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Number of rounds; later rounds reuse cached passes
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Print lifecycle events as JSON lines
    #[arg(short, long)]
    pub events: bool,

    /// Save results to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay command-line flags, the last configuration layer
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(workers) = self.workers {
            config.run.max_workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.run.timeout_ms = timeout;
        }
        if let Some(retries) = self.retries {
            config.run.retries = retries;
        }
        if let Some(name) = &self.backoff {
            config.run.backoff.strategy = BackoffStrategy::from_str(name)
                .with_context(|| format!("Unknown backoff strategy: {name}"))?;
        }
        if let Some(ms) = self.backoff_ms {
            config.run.backoff.base_ms = ms;
        }
        if self.bail {
            config.run.bail = true;
        }
        if self.no_cache {
            config.run.cache_enabled = false;
        }
        if self.metrics {
            config.run.collect_metrics = true;
        }
        if !self.tags.is_empty() {
            config.tags = self.tags.clone();
        }
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        Ok(())
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Suite file (YAML or JSON)
    #[arg(short, long)]
    pub suite: PathBuf,

    /// Show detailed test information
    #[arg(short, long)]
    pub detailed: bool,

    /// Only list tests with this tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Write an example configuration file
    Init {
        /// Destination
        #[arg(long, default_value = "./testflow.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// File to check
        file: PathBuf,
    },

    /// Show environment variable overrides
    Env,

    /// List available profiles
    Profiles,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["testflow", "list", "--suite", "s.yaml", "--detailed"]);
        match args.command {
            Command::List(list_args) => {
                assert!(list_args.detailed);
                assert_eq!(list_args.suite, PathBuf::from("s.yaml"));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "testflow",
            "run",
            "--suite",
            "suite.yaml",
            "--workers",
            "2",
            "--rounds",
            "3",
            "--bail",
            "--tag",
            "smoke",
            "--tag",
            "fast",
            "--profile",
            "ci",
        ]);
        assert_eq!(args.profile.as_deref(), Some("ci"));
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.workers, Some(2));
                assert_eq!(run_args.rounds, Some(3));
                assert!(run_args.bail);
                assert_eq!(run_args.tags, vec!["smoke", "fast"]);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_args_apply() {
        let args = Args::parse_from([
            "testflow",
            "run",
            "-s",
            "suite.yaml",
            "--no-cache",
            "--backoff",
            "exponential",
            "--backoff-ms",
            "50",
            "--format",
            "csv",
        ]);
        let Command::Run(run_args) = args.command else {
            panic!("Expected Run command");
        };

        let mut config = AppConfig::default();
        run_args.apply(&mut config).unwrap();
        assert!(!config.run.cache_enabled);
        assert_eq!(config.run.backoff.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.run.backoff.base_ms, 50);
        assert_eq!(config.format, "csv");
        // Unset flags keep lower layers
        assert_eq!(config.run.max_workers, 4);
    }

    #[test]
    fn test_unknown_backoff() {
        let args = Args::parse_from(["testflow", "run", "-s", "x", "--backoff", "random"]);
        let Command::Run(run_args) = args.command else {
            panic!("Expected Run command");
        };
        assert!(run_args.apply(&mut AppConfig::default()).is_err());
    }

    #[test]
    fn test_log_level_flag() {
        let args = Args::parse_from(["testflow", "list", "-s", "x", "--log-level", "warn"]);
        assert_eq!(args.log_level(true).unwrap(), LogLevel::Warn);

        let args = Args::parse_from(["testflow", "list", "-s", "x"]);
        assert_eq!(args.log_level(true).unwrap(), LogLevel::Debug);
        assert_eq!(args.log_level(false).unwrap(), LogLevel::Info);

        let args = Args::parse_from(["testflow", "--log-level", "loud", "list", "-s", "x"]);
        assert!(args.log_level(false).is_err());
    }

    #[test]
    fn test_config_init_defaults() {
        let args = Args::parse_from(["testflow", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("./testflow.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
