//! Configuration module
//!
//! Settings are layered: built-in defaults, then the config file, then a named
//! profile, then `TESTFLOW_*` environment variables. Command-line flags are
//! applied last by the binary.

pub mod env;
pub mod file;
pub mod profile;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub use env::EnvConfig;
pub use file::ConfigFile;
pub use profile::{ProfileManager, RunProfile};

use crate::models::RunConfig;
use crate::output::OutputFormat;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine settings
    pub run: RunConfig,

    /// Number of times the suite is run
    pub rounds: u32,

    /// Output format name
    pub format: String,

    /// Only run tests carrying one of these tags
    pub tags: Vec<String>,

    /// Enable debug logging
    pub verbose: bool,

    /// Profile applied when none is given on the command line
    pub profile: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            rounds: 1,
            format: "table".to_string(),
            tags: Vec::new(),
            verbose: false,
            profile: None,
        }
    }
}

impl AppConfig {
    /// Resolve file, profile and environment layers
    ///
    /// `profile` overrides the environment's and the file's profile choice.
    pub fn resolve(file: &ConfigFile, profile: Option<&str>, env: &EnvConfig) -> Result<Self> {
        let mut config = file.app.clone();

        let profile_name = profile
            .map(str::to_string)
            .or_else(|| env.profile.clone())
            .or_else(|| config.profile.clone());

        if let Some(name) = profile_name {
            let manager = ProfileManager::with_file(file);
            let Some(found) = manager.profile(&name) else {
                bail!(
                    "Unknown profile '{}'. Available: {}",
                    name,
                    manager.names().join(", ")
                );
            };
            found.apply(&mut config);
            config.profile = Some(name);
        }

        env.apply(&mut config);
        Ok(config)
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        OutputFormat::from_str(&self.format)
            .with_context(|| format!("Unknown output format: {}", self.format))
    }

    /// Check every layer's contribution
    pub fn validate(&self) -> Result<()> {
        self.run.validate().context("Invalid run configuration")?;
        self.output_format()?;
        if self.rounds == 0 {
            bail!("rounds must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.run.max_workers, 4);
        assert_eq!(config.run.timeout_ms, 5000);
        assert_eq!(config.rounds, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("rounds: 3\nrun:\n  max_workers: 8\n").unwrap();
        assert_eq!(config.rounds, 3);
        assert_eq!(config.run.max_workers, 8);
        assert_eq!(config.run.retries, 0);
        assert_eq!(config.format, "table");
    }

    #[test]
    fn test_resolve_layers() {
        let mut file = ConfigFile::default();
        file.app.run.max_workers = 6;
        file.app.format = "json".to_string();

        let env = EnvConfig {
            retries: Some(3),
            ..EnvConfig::default()
        };

        let config = AppConfig::resolve(&file, Some("ci"), &env).unwrap();
        assert_eq!(config.run.max_workers, 6);
        assert_eq!(config.format, "json");
        assert!(!config.run.cache_enabled);
        // Environment beats the profile's retries
        assert_eq!(config.run.retries, 3);
        assert_eq!(config.profile.as_deref(), Some("ci"));
    }

    #[test]
    fn test_resolve_profile_from_file_default() {
        let mut file = ConfigFile::default();
        file.app.profile = Some("debug".to_string());

        let config = AppConfig::resolve(&file, None, &EnvConfig::default()).unwrap();
        assert_eq!(config.run.max_workers, 1);
        assert!(config.verbose);
    }

    #[test]
    fn test_unknown_profile() {
        let err = AppConfig::resolve(&ConfigFile::default(), Some("nope"), &EnvConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown profile 'nope'"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.run.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rounds = 0;
        assert!(config.validate().is_err());
    }
}
