//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::profile::RunProfile;
use super::{AppConfig, EnvConfig};
use crate::models::BackoffConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testflow.yaml",
    "./testflow.yml",
    "./.testflow.yaml",
    "~/.config/testflow/config.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Additional or replacement profiles
    #[serde(default)]
    pub profiles: Vec<RunProfile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load the file named explicitly, by the environment, or found on disk
    ///
    /// Returns the defaults and no path when no file exists.
    pub fn locate(explicit: Option<&Path>, env: &EnvConfig) -> Result<(Self, Option<PathBuf>)> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env.config_file.as_deref().map(expand_path))
            .or_else(Self::find);

        match path {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_json_file(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json_file(path) {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        self.app.validate()?;

        let mut names = HashSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                anyhow::bail!("Profile without a name");
            }
            if !names.insert(profile.name.as_str()) {
                anyhow::bail!("Duplicate profile '{}'", profile.name);
            }
            if profile.workers == Some(0) {
                anyhow::bail!("Profile '{}' sets workers to 0", profile.name);
            }
            if profile.timeout_ms == Some(0) {
                anyhow::bail!("Profile '{}' sets timeout_ms to 0", profile.name);
            }
            if profile.rounds == Some(0) {
                anyhow::bail!("Profile '{}' sets rounds to 0", profile.name);
            }
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut app = AppConfig::default();
        app.run.retries = 1;
        app.run.backoff = BackoffConfig::exponential(250);

        Self {
            version: default_version(),
            app,
            profiles: vec![
                RunProfile::new("nightly")
                    .with_description("Full suite, three rounds with retries")
                    .with_retries(3),
                RunProfile::new("quick")
                    .with_description("Fast feedback on tagged tests")
                    .with_workers(8)
                    .with_tag("fast"),
            ],
        }
    }

    pub fn profile(&self, name: &str) -> Option<&RunProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is JSON based on extension; everything else is YAML
fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
