//! Test unit descriptors
//!
//! A `TestUnit` is produced by discovery and never mutated by the engine.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Future returned by one invocation of a test action
pub type ActionFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Zero-argument asynchronous test body
///
/// Cloning is cheap; every attempt calls [`TestAction::invoke`] again.
#[derive(Clone)]
pub struct TestAction(Arc<dyn Fn() -> ActionFuture + Send + Sync>);

impl TestAction {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    /// Start one attempt
    pub fn invoke(&self) -> ActionFuture {
        (self.0)()
    }
}

impl fmt::Debug for TestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestAction(..)")
    }
}

/// Immutable description of one test
#[derive(Clone, Debug)]
pub struct TestUnit {
    pub id: String,
    pub name: String,
    pub action: TestAction,
    /// Overrides `RunConfig::timeout_ms`
    pub timeout: Option<Duration>,
    /// Overrides `RunConfig::retries`
    pub retries: Option<u32>,
    pub tags: Vec<String>,
    pub skip: bool,
    pub only: bool,
}

impl TestUnit {
    pub fn new(id: impl Into<String>, name: impl Into<String>, action: TestAction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            action,
            timeout: None,
            retries: None,
            tags: Vec::new(),
            skip: false,
            only: false,
        }
    }

    /// Shorthand for a unit whose id doubles as its name
    pub fn from_fn<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        Self::new(id.clone(), id, TestAction::new(f))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
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

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
