//! Invocation events for observers of the execution core
//!
//! Listeners are notified around every body execution. A pure cache hit
//! never produces events, so a listener sees exactly one
//! `before_invocation`/`after_invocation` pair per executed unit of work,
//! including executions that fail.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// The parts of a unit of work that observers are allowed to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDescription {
    /// Human readable name, e.g. `"MinifyTransform: /src/app.js"`
    pub display_name: String,
    /// The primary input artifact of the work
    pub input_artifact: PathBuf,
    /// Unique id of the identity the work resolved to
    pub identity: String,
}

/// Invocation lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationEvent {
    /// The body of a unit of work is about to run
    BeforeInvocation { work: WorkDescription },
    /// The body of a unit of work has finished, successfully or not
    AfterInvocation { work: WorkDescription },
}

/// Observer notified around body execution
pub trait InvocationListener: Send + Sync {
    /// Called right before the body runs
    fn before_invocation(&self, work: &WorkDescription);

    /// Called after the body finished, even when it failed
    fn after_invocation(&self, work: &WorkDescription);
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl InvocationListener for NoopListener {
    fn before_invocation(&self, _work: &WorkDescription) {}

    fn after_invocation(&self, _work: &WorkDescription) {}
}

/// Listener that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl InvocationListener for TracingListener {
    fn before_invocation(&self, work: &WorkDescription) {
        debug!(work = %work.display_name, identity = %work.identity, "before invocation");
    }

    fn after_invocation(&self, work: &WorkDescription) {
        debug!(work = %work.display_name, identity = %work.identity, "after invocation");
    }
}

/// Listener that records every event in arrival order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<InvocationEvent>>,
}

impl EventLog {
    /// Create an empty event log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<InvocationEvent> {
        self.events.lock().clone()
    }

    /// Number of `BeforeInvocation` events seen so far
    pub fn invocations_started(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, InvocationEvent::BeforeInvocation { .. }))
            .count()
    }

    /// Number of `AfterInvocation` events seen so far
    pub fn invocations_finished(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, InvocationEvent::AfterInvocation { .. }))
            .count()
    }
}

impl InvocationListener for EventLog {
    fn before_invocation(&self, work: &WorkDescription) {
        self.events.lock().push(InvocationEvent::BeforeInvocation {
            work: work.clone(),
        });
    }

    fn after_invocation(&self, work: &WorkDescription) {
        self.events.lock().push(InvocationEvent::AfterInvocation {
            work: work.clone(),
        });
    }
}
