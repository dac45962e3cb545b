//! testflow - run test suites on a bounded worker pool
//!
//! ## Usage
//!
//! ```bash
//! # Run a suite with 8 workers and one retry per test
//! testflow run --suite suite.yaml --workers 8 --retries 1
//!
//! # Three rounds; later rounds reuse cached passes
//! testflow run --suite suite.yaml --rounds 3 --format summary
//!
//! # Stream lifecycle events as JSON lines
//! testflow run --suite suite.yaml --events
//!
//! # List tests tagged "smoke"
//! testflow list --suite suite.yaml --tag smoke --detailed
//!
//! # Write an example configuration
//! testflow config init
//! ```

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use testflow::cli::{self, Args};
use testflow::config::{env::print_env_help, AppConfig, ConfigFile, EnvConfig, ProfileManager};
use testflow::events::{self, LogListener};
use testflow::output::{write_results_to_file, OutputFormat, ResultFormatter};
use testflow::suite::Suite;
use testflow::utils::{init_logger, Stopwatch};
use testflow::TestRunner;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let env = EnvConfig::load();
    let (file, file_path) = ConfigFile::locate(args.config.as_deref(), &env)?;
    let mut app = AppConfig::resolve(&file, args.profile.as_deref(), &env)?;
    if args.verbose {
        app.verbose = true;
    }

    init_logger(args.log_level(app.verbose)?);
    match &file_path {
        Some(path) => debug!("Using config file {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    if env.has_any() {
        debug!("Applied TESTFLOW_* environment overrides");
    }

    match args.command {
        cli::Command::Run(run_args) => run_suite(run_args, app).await,
        cli::Command::List(list_args) => {
            list_tests(list_args)?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &file, file_path.as_deref(), &app)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_suite(args: cli::RunArgs, mut app: AppConfig) -> Result<ExitCode> {
    args.apply(&mut app)?;
    app.validate()?;
    let format = app.output_format()?;

    let suite = Suite::load(&args.suite)?;
    let units = suite.units(&app.tags);
    if units.is_empty() {
        warn!("No tests selected from suite '{}'", suite.name);
    }

    info!(
        "Running suite '{}' ({} tests, {} round(s), {} workers)",
        suite.name,
        units.len(),
        app.rounds,
        app.run.max_workers
    );

    let mut runner = TestRunner::new(app.run.clone())?.with_listener(Arc::new(LogListener));

    let printer = if args.events {
        let (listener, mut rx) = events::channel();
        runner = runner.with_listener(Arc::new(listener));
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("Failed to serialize {} event: {}", event.name(), e),
                }
            }
        }))
    } else {
        None
    };

    let mut formatter = ResultFormatter::new(format);
    if !std::io::stdout().is_terminal() {
        formatter = formatter.no_color();
    }

    let mut stopwatch = Stopwatch::new();
    let mut summaries = Vec::with_capacity(app.rounds as usize);

    for round in 1..=app.rounds {
        let summary = runner.run_round(round, &suite.name, &units).await;
        stopwatch.lap(format!("Round {round}"));

        if printer.is_none() && format.is_streamable() {
            println!("{}", formatter.format_summary(&summary)?);
            if format == OutputFormat::Summary {
                for failure in summary.failures() {
                    println!("  {}", formatter.format_result(failure)?);
                }
            }
        }
        summaries.push(summary);
    }

    if printer.is_none() && !format.is_streamable() {
        println!("{}", formatter.format_rounds(&summaries)?);
    }

    debug!("Round timings:\n{}", stopwatch.format());
    let cache = runner.cache().stats();
    debug!(
        hits = cache.hits,
        misses = cache.misses,
        evictions = cache.evictions,
        "Cache statistics"
    );
    debug!("Pool statistics: {:?}", runner.pool_stats());

    runner.cleanup();
    drop(runner);
    if let Some(printer) = printer {
        printer.await?;
    }

    if let Some(path) = &args.output {
        write_results_to_file(path, &summaries, format)?;
        info!("Results saved to {}", path.display());
    }

    let failed: usize = summaries.iter().map(|s| s.failed).sum();
    if failed > 0 {
        warn!("{} failed test result(s)", failed);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn list_tests(args: cli::ListArgs) -> Result<()> {
    let suite = Suite::load(&args.suite)?;
    let tests = suite.filter_by_tags(&args.tags);

    println!("\n{} ({} tests)\n", suite.name, tests.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (index, test) in tests.iter().enumerate() {
        let marker = if test.skip {
            " (skip)"
        } else if test.only {
            " (only)"
        } else {
            ""
        };

        if args.detailed {
            println!("  {:3}. {:30} [{}]{}", index + 1, test.id, test.kind(), marker);
            if test.name.is_some() {
                println!("       name:    {}", test.display_name());
            }
            if let Some(command) = &test.command {
                println!("       command: {command}");
            }
            if let Some(ms) = test.timeout_ms {
                println!("       timeout: {ms}ms");
            }
            if let Some(retries) = test.retries {
                println!("       retries: {retries}");
            }
            if !test.tags.is_empty() {
                println!("       tags:    {}", test.tags.join(", "));
            }
        } else {
            println!("  {:3}. {}{}", index + 1, test.display_name(), marker);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

fn manage_config(
    args: cli::ConfigArgs,
    file: &ConfigFile,
    file_path: Option<&std::path::Path>,
    app: &AppConfig,
) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show => {
            match file_path {
                Some(path) => println!("# Config file: {}", path.display()),
                None => println!("# No config file found, showing defaults"),
            }
            println!("{}", serde_yaml::to_string(app)?);
        }

        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Validate { file } => match ConfigFile::load(&file) {
            Ok(_) => println!("✓ Configuration file is valid: {}", file.display()),
            Err(e) => {
                println!("✗ Configuration file is invalid: {}", file.display());
                println!("  Error: {e:#}");
                return Err(e);
            }
        },

        cli::ConfigAction::Env => {
            EnvConfig::load().print_summary();
            println!();
            print_env_help();
        }

        cli::ConfigAction::Profiles => {
            let manager = ProfileManager::with_file(file);
            println!("Profiles:");
            println!("{:-<60}", "");
            for profile in manager.list() {
                println!("  {:12} - {}", profile.name, profile.description);
            }
        }
    }

    Ok(())
}
