//! Suite files
//!
//! Declarative test lists in YAML or JSON. Each entry becomes a [`TestUnit`]:
//! either a shell command or a simulated test that sleeps and fails a fixed
//! number of attempts.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::SuiteError;
use crate::models::{TestAction, TestUnit};

/// Lines of stderr kept in a failed command's error
const STDERR_TAIL_LINES: usize = 5;

/// One test entry of a suite file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSpec {
    pub id: String,
    pub name: Option<String>,
    /// Shell command run through `sh -c`
    pub command: Option<String>,
    pub sleep_ms: u64,
    /// Number of leading attempts that fail
    pub fail_attempts: u32,
    /// Fail every attempt
    pub fail: bool,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub tags: Vec<String>,
    pub skip: bool,
    pub only: bool,
}

impl TestSpec {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> &'static str {
        if self.command.is_some() {
            "command"
        } else {
            "simulated"
        }
    }

    /// Build the executable unit
    pub fn to_unit(&self) -> TestUnit {
        let action = match &self.command {
            Some(command) => command_action(command.clone()),
            None => simulated_action(self.sleep_ms, self.fail_attempts, self.fail),
        };

        let mut unit = TestUnit::new(&self.id, self.display_name(), action);
        if let Some(ms) = self.timeout_ms {
            unit = unit.with_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = self.retries {
            unit = unit.with_retries(retries);
        }
        for tag in &self.tags {
            unit = unit.with_tag(tag);
        }
        if self.skip {
            unit = unit.skipped();
        }
        if self.only {
            unit = unit.only();
        }
        unit
    }
}

fn command_action(command: String) -> TestAction {
    let command = Arc::new(command);
    TestAction::new(move || {
        let command = command.clone();
        async move { run_command(&command).await }
    })
}

async fn run_command(command: &str) -> anyhow::Result<()> {
    debug!(command, "Running command");
    let output = Command::new("sh").arg("-c").arg(command).output().await?;

    if !output.status.success() {
        let tail = stderr_tail(&String::from_utf8_lossy(&output.stderr));
        if tail.is_empty() {
            bail!("command exited with {}", output.status);
        }
        bail!("command exited with {}: {}", output.status, tail);
    }
    Ok(())
}

fn simulated_action(sleep_ms: u64, fail_attempts: u32, always_fail: bool) -> TestAction {
    let attempts = Arc::new(AtomicU32::new(0));
    TestAction::new(move || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        simulate(attempt, sleep_ms, fail_attempts, always_fail)
    })
}

async fn simulate(
    attempt: u32,
    sleep_ms: u64,
    fail_attempts: u32,
    always_fail: bool,
) -> anyhow::Result<()> {
    if sleep_ms > 0 {
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
    }
    if always_fail {
        bail!("simulated failure");
    }
    if attempt <= fail_attempts {
        bail!("simulated failure on attempt {attempt}");
    }
    Ok(())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// A loaded test suite
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    #[serde(default = "default_suite_name")]
    pub name: String,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

fn default_suite_name() -> String {
    "suite".to_string()
}

impl Suite {
    /// Load and validate a suite; `.json` files are JSON, anything else YAML
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
            path: shown.clone(),
            source,
        })?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let suite: Suite = if is_json {
            serde_json::from_str(&content).map_err(|e| SuiteError::Parse {
                path: shown.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| SuiteError::Parse {
                path: shown.clone(),
                message: e.to_string(),
            })?
        };

        suite.validate()?;
        debug!(suite = %suite.name, tests = suite.tests.len(), path = %shown, "Loaded suite");
        Ok(suite)
    }

    /// Reject empty and duplicate ids
    pub fn validate(&self) -> Result<(), SuiteError> {
        let mut seen = HashSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            if test.id.trim().is_empty() {
                return Err(SuiteError::EmptyId(index + 1));
            }
            if !seen.insert(test.id.as_str()) {
                return Err(SuiteError::DuplicateId(test.id.clone()));
            }
        }
        Ok(())
    }

    /// Tests carrying any of `tags`; all tests when `tags` is empty
    pub fn filter_by_tags(&self, tags: &[String]) -> Vec<&TestSpec> {
        self.tests
            .iter()
            .filter(|t| tags.is_empty() || t.tags.iter().any(|tag| tags.contains(tag)))
            .collect()
    }

    /// Executable units for the tests selected by `tags`
    pub fn units(&self, tags: &[String]) -> Vec<TestUnit> {
        self.filter_by_tags(tags)
            .into_iter()
            .map(TestSpec::to_unit)
            .collect()
    }
}
