//! Declared units of work handed to the executor

use crate::fingerprint::NormalizationStrategy;
use crate::identity::{Producer, SecondaryInputs};
use crate::workspace::Workspace;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Body of a unit of work
///
/// Returns the produced locations. Each must lie below
/// [`ExecutionContext::output_dir`] or be, or lie inside, the input artifact.
pub type WorkBody = Arc<dyn Fn(&ExecutionContext) -> anyhow::Result<Vec<PathBuf>> + Send + Sync>;

/// Whether results of a unit of work may be reused
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Caching {
    #[default]
    Enabled,
    Disabled { reason: String },
}

/// What the body sees while it runs
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    input_artifact: PathBuf,
    dependencies: Vec<PathBuf>,
    timeout: Option<Duration>,
    workspace: Workspace,
}

impl ExecutionContext {
    pub(crate) fn new(
        input_artifact: PathBuf,
        dependencies: Vec<PathBuf>,
        timeout: Option<Duration>,
        workspace: Workspace,
    ) -> Self {
        Self {
            input_artifact,
            dependencies,
            timeout,
            workspace,
        }
    }

    /// Absolute path of the input artifact
    pub fn input_artifact(&self) -> &Path {
        &self.input_artifact
    }

    /// Empty directory reserved for this execution's outputs
    pub fn output_dir(&self) -> PathBuf {
        self.workspace.output_dir()
    }

    pub fn dependencies(&self) -> &[PathBuf] {
        &self.dependencies
    }

    /// Declared timeout; enforcing it is up to the body
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

/// One cacheable computation over an input artifact
#[derive(Clone)]
pub struct UnitOfWork {
    pub(crate) name: String,
    pub(crate) input_artifact: PathBuf,
    pub(crate) producer: Producer,
    pub(crate) secondary_inputs: SecondaryInputs,
    pub(crate) input_normalization: NormalizationStrategy,
    pub(crate) dependencies: Vec<PathBuf>,
    pub(crate) dependencies_normalization: NormalizationStrategy,
    pub(crate) caching: Caching,
    pub(crate) timeout: Option<Duration>,
    pub(crate) body: WorkBody,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("name", &self.name)
            .field("input_artifact", &self.input_artifact)
            .field("producer", &self.producer)
            .field("caching", &self.caching)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Start describing a unit of work named `name` over `input_artifact`
    pub fn builder<F>(
        name: impl Into<String>,
        input_artifact: impl Into<PathBuf>,
        body: F,
    ) -> UnitOfWorkBuilder
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<Vec<PathBuf>> + Send + Sync + 'static,
    {
        UnitOfWorkBuilder::new(name.into(), input_artifact.into(), Arc::new(body))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_artifact(&self) -> &Path {
        &self.input_artifact
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn secondary_inputs(&self) -> &SecondaryInputs {
        &self.secondary_inputs
    }

    pub fn caching(&self) -> &Caching {
        &self.caching
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self.caching, Caching::Enabled)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `"<name>: <input artifact>"`
    pub fn display_name(&self) -> String {
        format!("{}: {}", self.name, self.input_artifact.display())
    }
}

/// Builder for [`UnitOfWork`]
pub struct UnitOfWorkBuilder {
    work: UnitOfWork,
}

impl UnitOfWorkBuilder {
    fn new(name: String, input_artifact: PathBuf, body: WorkBody) -> Self {
        let secondary_inputs = SecondaryInputs::new(name.clone());
        Self {
            work: UnitOfWork {
                name,
                input_artifact,
                producer: Producer::External,
                secondary_inputs,
                input_normalization: NormalizationStrategy::RelativePath,
                dependencies: Vec::new(),
                dependencies_normalization: NormalizationStrategy::NameOnly,
                caching: Caching::Enabled,
                timeout: None,
                body,
            },
        }
    }

    /// Who produced the input artifact; external artifacts by default
    pub fn producer(mut self, producer: Producer) -> Self {
        self.work.producer = producer;
        self
    }

    /// Identifier of the implementation; defaults to the work's name
    pub fn implementation(mut self, implementation: impl Into<String>) -> Self {
        let values = self.work.secondary_inputs.values().clone();
        let mut secondary = SecondaryInputs::new(implementation);
        for (name, value) in values {
            secondary.insert(name, value);
        }
        self.work.secondary_inputs = secondary;
        self
    }

    /// Named configuration value of the work
    pub fn property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.work.secondary_inputs.insert(name, value);
        self
    }

    pub fn input_normalization(mut self, strategy: NormalizationStrategy) -> Self {
        self.work.input_normalization = strategy;
        self
    }

    pub fn dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.work.dependencies.push(path.into());
        self
    }

    pub fn dependencies<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.work.dependencies.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn dependencies_normalization(mut self, strategy: NormalizationStrategy) -> Self {
        self.work.dependencies_normalization = strategy;
        self
    }

    /// Always execute, never consult or record history
    pub fn not_cacheable(mut self, reason: impl Into<String>) -> Self {
        self.work.caching = Caching::Disabled {
            reason: reason.into(),
        };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.work.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> UnitOfWork {
        self.work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &ExecutionContext) -> anyhow::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    #[test]
    fn test_display_name() {
        let work = UnitOfWork::builder("Minify", "/src/app.js", noop).build();
        assert_eq!(work.display_name(), "Minify: /src/app.js");
        assert!(work.is_cacheable());
    }

    #[test]
    fn test_implementation_keeps_properties() {
        let work = UnitOfWork::builder("Minify", "/src/app.js", noop)
            .property("level", json!(3))
            .implementation("Minify@2")
            .build();
        assert_eq!(work.secondary_inputs().implementation(), "Minify@2");
        assert_eq!(work.secondary_inputs().values()["level"], json!(3));
    }

    #[test]
    fn test_property_order_does_not_matter() {
        let a = UnitOfWork::builder("T", "/in", noop)
            .property("a", json!(1))
            .property("b", json!({"y": 2, "x": 1}))
            .build();
        let b = UnitOfWork::builder("T", "/in", noop)
            .property("b", json!({"x": 1, "y": 2}))
            .property("a", json!(1))
            .build();
        assert_eq!(a.secondary_inputs().hash(), b.secondary_inputs().hash());
    }

    #[test]
    fn test_not_cacheable() {
        let work = UnitOfWork::builder("Copy", "/src/a", noop)
            .not_cacheable("writes outside its workspace")
            .timeout(Duration::from_secs(5))
            .build();
        assert!(!work.is_cacheable());
        assert_eq!(work.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            work.caching(),
            &Caching::Disabled {
                reason: "writes outside its workspace".to_string()
            }
        );
    }
}
