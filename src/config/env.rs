//! Environment variable configuration
//!
//! Provides `TESTFLOW_*` overrides for configuration.

use std::env;
use std::str::FromStr;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTFLOW";

/// Configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// TESTFLOW_WORKERS
    pub workers: Option<usize>,
    /// TESTFLOW_TIMEOUT, in milliseconds
    pub timeout_ms: Option<u64>,
    /// TESTFLOW_RETRIES
    pub retries: Option<u32>,
    /// TESTFLOW_BAIL
    pub bail: Option<bool>,
    /// TESTFLOW_CACHE
    pub cache: Option<bool>,
    /// TESTFLOW_FORMAT
    pub format: Option<String>,
    /// TESTFLOW_VERBOSE
    pub verbose: Option<bool>,
    /// TESTFLOW_PROFILE
    pub profile: Option<String>,
    /// TESTFLOW_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(format!("{ENV_PREFIX}_{name}")).ok())
    }

    /// Build from any variable source; `lookup` receives unprefixed names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).map(|v| parse_bool(&v));

        Self {
            workers: parse_var(&lookup, "WORKERS"),
            timeout_ms: parse_var(&lookup, "TIMEOUT"),
            retries: parse_var(&lookup, "RETRIES"),
            bail: flag("BAIL"),
            cache: flag("CACHE"),
            format: lookup("FORMAT"),
            verbose: flag("VERBOSE"),
            profile: lookup("PROFILE"),
            config_file: lookup("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Overlay set variables onto `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(workers) = self.workers {
            config.run.max_workers = workers;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.run.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.run.retries = retries;
        }
        if let Some(bail) = self.bail {
            config.run.bail = bail;
        }
        if let Some(cache) = self.cache {
            config.run.cache_enabled = cache;
        }
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_WORKERS:  {:?}", self.workers);
        println!("  {ENV_PREFIX}_TIMEOUT:  {:?}", self.timeout_ms);
        println!("  {ENV_PREFIX}_RETRIES:  {:?}", self.retries);
        println!("  {ENV_PREFIX}_BAIL:     {:?}", self.bail);
        println!("  {ENV_PREFIX}_CACHE:    {:?}", self.cache);
        println!("  {ENV_PREFIX}_FORMAT:   {:?}", self.format);
        println!("  {ENV_PREFIX}_VERBOSE:  {:?}", self.verbose);
        println!("  {ENV_PREFIX}_PROFILE:  {:?}", self.profile);
        println!("  {ENV_PREFIX}_CONFIG:   {:?}", self.config_file);
    }
}

/// Parse a numeric variable; unparsable values count as unset
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all TESTFLOW environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_WORKERS   Maximum concurrent tests");
    println!("  {ENV_PREFIX}_TIMEOUT   Per-attempt timeout in milliseconds");
    println!("  {ENV_PREFIX}_RETRIES   Retry budget per test");
    println!("  {ENV_PREFIX}_BAIL      Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_CACHE     Reuse passed results (true/false)");
    println!("  {ENV_PREFIX}_FORMAT    Output format (table, json, json-pretty, csv, summary)");
    println!("  {ENV_PREFIX}_VERBOSE   Enable verbose output (true/false)");
    println!("  {ENV_PREFIX}_PROFILE   Profile to apply (ci, smoke, debug, or file-defined)");
    println!("  {ENV_PREFIX}_CONFIG    Path to configuration file");
    println!("  RUST_LOG           Log filter, overrides --verbose");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WORKERS=8");
    println!("  export {ENV_PREFIX}_PROFILE=ci");
    println!("  testflow run --suite suite.yaml");
}
