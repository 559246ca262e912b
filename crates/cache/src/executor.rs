//! Work executor: cache lookup, execution and history update
//!
//! Callers turn a [`UnitOfWork`] into a [`CacheableInvocation`], which fixes
//! the identity up front. The invocation can then be checked for a reusable
//! result without running anything, or invoked:
//!
//! 1. acquire the identity's workspace exclusively
//! 2. reuse the persisted results when history matches the current inputs
//!    and a fresh fingerprint of the workspace outputs
//! 3. otherwise run the body, persist its results and record history
//!
//! A failed body never leaves a history record behind, so the next
//! invocation executes again.

use crate::config::{ExecutorConfig, HistoryBackend};
use crate::fingerprint::{
    fingerprint, fingerprint_collection, normalize_path, FileSystemAccess, Fingerprint,
    Fingerprinter, NormalizationStrategy,
};
use crate::history::{
    ExecutionHistoryStore, ExecutionOutcome, FileHistoryStore, HistoryEntry, InMemoryHistoryStore,
};
use crate::identity::{resolve, Identity, InputFingerprints, Producer};
use crate::operations::OperationTracker;
use crate::results::{ResultSet, ResultsCodec};
use crate::work::{ExecutionContext, UnitOfWork};
use crate::workspace::{Workspace, WorkspaceManager};
use chrono::Utc;
use dashmap::DashMap;
use kiln_core::{
    Error, InvocationListener, Result, TracingListener, WorkDescription, DEPENDENCIES_PROPERTY,
    HISTORY_DIR_NAME, INPUT_ARTIFACT_PROPERTY, OUTPUT_DIRECTORY_PROPERTY, RESULTS_FILE_PROPERTY,
    SECONDARY_INPUTS_PROPERTY,
};
use kiln_utils::tracing::transform_span;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Workspaces and history sharing one root directory
struct WorkspaceScope {
    workspaces: WorkspaceManager,
    history: Arc<dyn ExecutionHistoryStore>,
}

/// Entry point for running units of work with caching
pub struct WorkExecutor {
    config: ExecutorConfig,
    fingerprinter: Fingerprinter,
    listener: Arc<dyn InvocationListener>,
    operations: Arc<OperationTracker>,
    scopes: DashMap<PathBuf, Arc<WorkspaceScope>>,
}

impl std::fmt::Debug for WorkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkExecutor")
            .field("config", &self.config)
            .field("scopes", &self.scopes.len())
            .finish_non_exhaustive()
    }
}

impl WorkExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fingerprinter: Fingerprinter::default(),
            listener: Arc::new(TracingListener),
            operations: Arc::new(OperationTracker::new()),
            scopes: DashMap::new(),
        })
    }

    /// Read inputs and outputs through `file_system` instead of the local disk
    #[must_use]
    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystemAccess>) -> Self {
        self.fingerprinter = Fingerprinter::new(file_system);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn InvocationListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn operations(&self) -> &Arc<OperationTracker> {
        &self.operations
    }

    /// Directory holding the workspaces of work from `producer`
    pub fn workspace_root(&self, producer: &Producer) -> PathBuf {
        match producer {
            Producer::External => self.config.cache_dir.clone(),
            Producer::Project { dir } => dir.join(&self.config.project_cache_dir),
        }
    }

    fn scope_for(&self, producer: &Producer) -> Arc<WorkspaceScope> {
        let root = self.workspace_root(producer);
        self.scopes
            .entry(root.clone())
            .or_insert_with(|| {
                let history: Arc<dyn ExecutionHistoryStore> = match self.config.history_backend {
                    HistoryBackend::File => {
                        Arc::new(FileHistoryStore::new(root.join(HISTORY_DIR_NAME)))
                    }
                    HistoryBackend::Memory => Arc::new(InMemoryHistoryStore::new()),
                };
                debug!(root = %root.display(), "opened workspace root");
                Arc::new(WorkspaceScope {
                    workspaces: WorkspaceManager::new(
                        root.clone(),
                        self.config.cross_process_locking,
                    ),
                    history,
                })
            })
            .clone()
    }

    /// Fingerprint the inputs of `work` and fix its identity
    ///
    /// Fails when an input cannot be read; nothing is recorded in that case.
    pub fn create_invocation<'a>(&'a self, work: &'a UnitOfWork) -> Result<CacheableInvocation<'a>> {
        let input_artifact = absolute(&work.input_artifact)?;
        let dependencies = work
            .dependencies
            .iter()
            .map(|p| absolute(p))
            .collect::<Result<Vec<_>>>()?;

        let input_snapshot = self.fingerprinter.snapshot(&input_artifact)?;
        let dependency_snapshots = dependencies
            .iter()
            .map(|p| self.fingerprinter.snapshot(p))
            .collect::<Result<Vec<_>>>()?;
        let dependencies_fingerprint =
            fingerprint_collection(&dependency_snapshots, work.dependencies_normalization);

        let inputs = InputFingerprints {
            input_path: input_artifact.clone(),
            normalized_input_path: normalize_path(&input_snapshot, work.input_normalization),
            input_hash: input_snapshot.hash(),
            dependencies: dependencies_fingerprint,
        };
        let secondary_hash = work.secondary_inputs.hash();
        let identity = resolve(&work.producer, &inputs, secondary_hash);

        let mut input_fingerprints = BTreeMap::new();
        input_fingerprints.insert(
            INPUT_ARTIFACT_PROPERTY.to_string(),
            fingerprint(&input_snapshot, work.input_normalization),
        );
        input_fingerprints.insert(DEPENDENCIES_PROPERTY.to_string(), dependencies_fingerprint);
        input_fingerprints.insert(
            SECONDARY_INPUTS_PROPERTY.to_string(),
            Fingerprint::from(secondary_hash),
        );

        let unique_id = identity.unique_id();
        debug!(work = %work.display_name(), identity = %unique_id, "resolved identity");

        Ok(CacheableInvocation {
            executor: self,
            work,
            scope: self.scope_for(&work.producer),
            identity,
            unique_id,
            input_artifact,
            dependencies,
            input_fingerprints,
        })
    }

    /// Create an invocation for `work` and invoke it
    pub fn execute(&self, work: &UnitOfWork) -> Result<InvocationOutcome> {
        self.create_invocation(work)?.execute()
    }
}

/// Result of [`CacheableInvocation::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    pub outcome: ExecutionOutcome,
    pub results: ResultSet,
    /// Unique id of the identity the work resolved to
    pub identity: String,
}

/// A unit of work with its identity fixed, not yet executed
pub struct CacheableInvocation<'a> {
    executor: &'a WorkExecutor,
    work: &'a UnitOfWork,
    scope: Arc<WorkspaceScope>,
    identity: Identity,
    unique_id: String,
    input_artifact: PathBuf,
    dependencies: Vec<PathBuf>,
    input_fingerprints: BTreeMap<String, Fingerprint>,
}

impl CacheableInvocation<'_> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Workspace bound to this invocation's identity
    pub fn workspace(&self) -> Workspace {
        self.scope.workspaces.workspace_for(&self.identity)
    }

    /// Reusable result from history and the results file, without executing
    ///
    /// `None` when the work is not cacheable, has no matching history, or
    /// its results file is gone. The workspace is neither locked nor
    /// re-fingerprinted.
    pub fn cached_result(&self) -> Option<Result<ResultSet>> {
        if !self.work.is_cacheable() {
            return None;
        }
        let entry = match self.scope.history.get(&self.unique_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        if entry.input_fingerprints != self.input_fingerprints {
            return None;
        }
        let workspace = self.workspace();
        if !workspace.results_file().is_file() {
            return None;
        }
        Some(self.codec().read(&workspace))
    }

    /// Reuse or produce the results of the work
    pub fn invoke(&self) -> Result<ResultSet> {
        self.execute().map(|outcome| outcome.results)
    }

    /// Like [`invoke`](Self::invoke), also reporting whether the body ran
    pub fn execute(&self) -> Result<InvocationOutcome> {
        self.scope
            .workspaces
            .with_workspace(&self.identity, |workspace| {
                if self.work.is_cacheable() {
                    if let Some(results) = self.up_to_date(workspace)? {
                        debug!(work = %self.work.display_name(), "up to date");
                        return Ok(self.outcome(ExecutionOutcome::UpToDate, results));
                    }
                }
                let results = self.run(workspace)?;
                Ok(self.outcome(ExecutionOutcome::Executed, results))
            })
    }

    fn outcome(&self, outcome: ExecutionOutcome, results: ResultSet) -> InvocationOutcome {
        InvocationOutcome {
            outcome,
            results,
            identity: self.unique_id.clone(),
        }
    }

    fn codec(&self) -> ResultsCodec {
        ResultsCodec::new(&self.input_artifact)
    }

    fn describe(&self) -> WorkDescription {
        WorkDescription {
            display_name: self.work.display_name(),
            input_artifact: self.input_artifact.clone(),
            identity: self.unique_id.clone(),
        }
    }

    fn up_to_date(&self, workspace: &Workspace) -> Result<Option<ResultSet>> {
        let Some(entry) = self.scope.history.get(&self.unique_id)? else {
            debug!(identity = %self.unique_id, "no history");
            return Ok(None);
        };
        if entry.input_fingerprints != self.input_fingerprints {
            debug!(identity = %self.unique_id, "inputs changed");
            return Ok(None);
        }
        if !workspace.results_file().is_file() {
            debug!(identity = %self.unique_id, "results file missing");
            return Ok(None);
        }
        if self.output_fingerprints(workspace)? != entry.output_fingerprints {
            debug!(identity = %self.unique_id, "workspace outputs changed");
            return Ok(None);
        }
        self.codec().read(workspace).map(Some)
    }

    fn output_fingerprints(&self, workspace: &Workspace) -> Result<BTreeMap<String, Fingerprint>> {
        let fingerprinter = &self.executor.fingerprinter;
        let mut outputs = BTreeMap::new();
        outputs.insert(
            OUTPUT_DIRECTORY_PROPERTY.to_string(),
            fingerprinter
                .fingerprint_path(&workspace.output_dir(), NormalizationStrategy::RelativePath)?,
        );
        outputs.insert(
            RESULTS_FILE_PROPERTY.to_string(),
            fingerprinter
                .fingerprint_path(&workspace.results_file(), NormalizationStrategy::RelativePath)?,
        );
        Ok(outputs)
    }

    fn run(&self, workspace: &Workspace) -> Result<ResultSet> {
        let description = self.describe();
        let _listener = ListenerScope::enter(&*self.executor.listener, &description);
        let cacheable = self.work.is_cacheable();

        if cacheable {
            self.scope.history.remove(&self.unique_id)?;
        }
        remove_if_exists(&workspace.results_file())?;
        reset_dir(&workspace.output_dir())?;

        let context = ExecutionContext::new(
            self.input_artifact.clone(),
            self.dependencies.clone(),
            self.work.timeout,
            workspace.clone(),
        );

        let span = transform_span(&description.display_name, &self.unique_id);
        let _entered = span.enter();
        let operation = self.executor.operations.scope(&description.display_name);
        let started = Instant::now();

        let produced = match (self.work.body)(&context) {
            Ok(files) => {
                operation.complete();
                files
            }
            Err(e) => {
                operation.fail(format!("{e:#}"));
                return Err(Error::execution(&description.display_name, e));
            }
        };
        let elapsed = started.elapsed();

        let results = ResultSet::new(produced);
        self.codec().write(workspace, &results)?;

        if cacheable {
            let entry = HistoryEntry {
                input_fingerprints: self.input_fingerprints.clone(),
                output_fingerprints: self.output_fingerprints(workspace)?,
                outcome: ExecutionOutcome::Executed,
                executed_at: Utc::now(),
                execution_time_ms: elapsed.as_millis() as u64,
                timeout_ms: self.work.timeout.map(|t| t.as_millis() as u64),
            };
            self.scope.history.put(&self.unique_id, &entry)?;
        }

        info!(
            work = %description.display_name,
            duration_ms = elapsed.as_millis() as u64,
            outputs = results.len(),
            "executed"
        );
        Ok(results)
    }
}

/// Fires `after_invocation` when dropped, whatever the exit path
struct ListenerScope<'a> {
    listener: &'a dyn InvocationListener,
    work: &'a WorkDescription,
}

impl<'a> ListenerScope<'a> {
    fn enter(listener: &'a dyn InvocationListener, work: &'a WorkDescription) -> Self {
        listener.before_invocation(work);
        Self { listener, work }
    }
}

impl Drop for ListenerScope<'_> {
    fn drop(&mut self) {
        self.listener.after_invocation(self.work);
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::file_system(path, "resolve against current directory", e))?;
    Ok(cwd.join(path))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::file_system(path, "remove stale results file", e)),
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::file_system(dir, "clear output directory", e)),
    }
    fs::create_dir_all(dir).map_err(|e| Error::file_system(dir, "create output directory", e))
}
