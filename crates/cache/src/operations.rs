//! Tracking of in-flight build operations for observability
//!
//! Each body execution is registered as an operation and later completed or
//! failed by id. Finishing an id that is not registered changes nothing and
//! is reported as a warning; no other entry is ever touched in its place.
//!
//! The executor holds an [`OperationScope`] around every body, which drops
//! the entry once the body returns or unwinds, so the registry only ever
//! holds operations that are still in flight.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Identifier of a tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Represents the current state of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Running {
        started_at: Instant,
    },
    Completed {
        started_at: Instant,
        completed_at: Instant,
    },
    Failed {
        started_at: Instant,
        failed_at: Instant,
        error: String,
    },
}

impl OperationState {
    /// Elapsed time so far, or total time once finished
    pub fn duration(&self) -> Duration {
        match self {
            OperationState::Running { started_at } => started_at.elapsed(),
            OperationState::Completed {
                started_at,
                completed_at,
            } => *completed_at - *started_at,
            OperationState::Failed {
                started_at,
                failed_at,
                ..
            } => *failed_at - *started_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed { .. } | OperationState::Failed { .. }
        )
    }

    fn started_at(&self) -> Instant {
        match self {
            OperationState::Running { started_at }
            | OperationState::Completed { started_at, .. }
            | OperationState::Failed { started_at, .. } => *started_at,
        }
    }
}

/// A registered operation
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub name: String,
    pub state: OperationState,
}

/// Registry of operations, keyed by id
#[derive(Debug, Default)]
pub struct OperationTracker {
    next_id: AtomicU64,
    operations: DashMap<OperationId, Operation>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running operation
    pub fn start(&self, name: impl Into<String>) -> OperationId {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        trace!(%id, %name, "operation started");
        self.operations.insert(
            id,
            Operation {
                id,
                name,
                state: OperationState::Running {
                    started_at: Instant::now(),
                },
            },
        );
        id
    }

    /// Mark `id` completed; `false` if it is unknown or already finished
    pub fn complete(&self, id: OperationId) -> bool {
        self.finish(id, |started_at| OperationState::Completed {
            started_at,
            completed_at: Instant::now(),
        })
    }

    /// Mark `id` failed; `false` if it is unknown or already finished
    pub fn fail(&self, id: OperationId, error: impl fmt::Display) -> bool {
        let error = error.to_string();
        self.finish(id, move |started_at| OperationState::Failed {
            started_at,
            failed_at: Instant::now(),
            error,
        })
    }

    fn finish(&self, id: OperationId, next: impl FnOnce(Instant) -> OperationState) -> bool {
        let Some(mut operation) = self.operations.get_mut(&id) else {
            warn!(%id, "finishing an operation that was never started");
            return false;
        };
        if operation.state.is_terminal() {
            warn!(%id, name = %operation.name, "operation already finished");
            return false;
        }
        operation.state = next(operation.state.started_at());
        trace!(%id, name = %operation.name, "operation finished");
        true
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.operations.get(&id).map(|op| op.value().clone())
    }

    /// Operations still running, oldest first
    pub fn running(&self) -> Vec<Operation> {
        let mut running: Vec<Operation> = self
            .operations
            .iter()
            .filter(|op| !op.state.is_terminal())
            .map(|op| op.value().clone())
            .collect();
        running.sort_by_key(|op| op.id);
        running
    }

    /// Register a running operation that is forgotten when the scope drops
    pub fn scope(&self, name: impl Into<String>) -> OperationScope<'_> {
        OperationScope {
            tracker: self,
            id: self.start(name),
        }
    }

    /// Number of registered operations, finished or not
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A running operation bound to a lexical scope
///
/// Dropping the scope while the operation is still running marks it failed,
/// which only happens when the body unwinds. The entry is removed either way.
#[derive(Debug)]
pub struct OperationScope<'a> {
    tracker: &'a OperationTracker,
    id: OperationId,
}

impl OperationScope<'_> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn complete(self) -> bool {
        self.tracker.complete(self.id)
    }

    pub fn fail(self, error: impl fmt::Display) -> bool {
        self.tracker.fail(self.id, error)
    }
}

impl Drop for OperationScope<'_> {
    fn drop(&mut self) {
        let abandoned = self
            .tracker
            .operations
            .get(&self.id)
            .is_some_and(|op| !op.state.is_terminal());
        if abandoned {
            self.tracker.fail(self.id, "abandoned while running");
        }
        self.tracker.operations.remove(&self.id);
    }
}
