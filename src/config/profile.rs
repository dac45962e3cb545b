//! Run profiles
//!
//! Named bundles of overrides selected with `--profile`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AppConfig, ConfigFile};

/// Partial override of an [`AppConfig`]; unset fields are left alone
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunProfile {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bail: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rounds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RunProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// CI: retry flaky tests, never trust cached passes
    pub fn ci() -> Self {
        Self {
            description: "Retries enabled, cache disabled".to_string(),
            retries: Some(2),
            cache: Some(false),
            ..Self::new("ci")
        }
    }

    /// Smoke: quick tagged subset that stops at the first failure
    pub fn smoke() -> Self {
        Self {
            description: "Tests tagged 'smoke', short timeout, bail on failure".to_string(),
            timeout_ms: Some(2000),
            bail: Some(true),
            tags: vec!["smoke".to_string()],
            ..Self::new("smoke")
        }
    }

    /// Debug: one worker, long timeout, metrics and verbose logs
    pub fn debug() -> Self {
        Self {
            description: "Serial execution with metrics and verbose logging".to_string(),
            workers: Some(1),
            timeout_ms: Some(60_000),
            retries: Some(0),
            metrics: Some(true),
            verbose: Some(true),
            ..Self::new("debug")
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn predefined() -> Vec<RunProfile> {
        vec![Self::ci(), Self::smoke(), Self::debug()]
    }

    pub fn find(name: &str) -> Option<RunProfile> {
        Self::predefined().into_iter().find(|p| p.name == name)
    }

    /// Overlay this profile onto `config`
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
        if let Some(metrics) = self.metrics {
            config.run.collect_metrics = metrics;
        }
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
        if !self.tags.is_empty() {
            config.tags = self.tags.clone();
        }
    }
}

/// Lookup of predefined and file-defined profiles
///
/// File-defined profiles replace predefined ones of the same name.
pub struct ProfileManager {
    profiles: BTreeMap<String, RunProfile>,
}

impl ProfileManager {
    pub fn new() -> Self {
        let profiles = RunProfile::predefined()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    pub fn with_file(file: &ConfigFile) -> Self {
        let mut manager = Self::new();
        for profile in &file.profiles {
            manager.add(profile.clone());
        }
        manager
    }

    pub fn add(&mut self, profile: RunProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn profile(&self, name: &str) -> Option<&RunProfile> {
        self.profiles.get(name)
    }

    pub fn list(&self) -> Vec<&RunProfile> {
        self.profiles.values().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}
