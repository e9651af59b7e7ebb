//! Work items executed on the engine thread
//!
//! A work item is built anywhere, carried through the [`WorkQueue`](crate::WorkQueue)
//! and run once by the pump. It never holds engine values: whatever it needs
//! from the engine it looks up through the `Ctx` it is given when it runs.

use crate::error::HostResult;
use crate::scheduler::Ticket;
use rquickjs::Ctx;
use std::fmt;

/// Deferred engine action.
pub type WorkFn = Box<dyn for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()> + Send>;

/// Release action, run exactly once when the item is dropped.
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

pub(crate) enum WorkKind {
    /// Arbitrary action against the engine context.
    Run(WorkFn),
    /// Completion of a bridged host operation.
    Settle { ticket: Ticket, outcome: HostResult },
    /// Run one pending engine job (promise reaction).
    EngineJob,
}

/// Unit of work queued for the engine thread.
pub struct WorkItem {
    pub(crate) kind: WorkKind,
    completes_operation: bool,
    release: Option<ReleaseFn>,
}

impl WorkItem {
    pub fn new<F>(action: F) -> Self
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()> + Send + 'static,
    {
        Self::from_kind(WorkKind::Run(Box::new(action)))
    }

    /// Work item that finishes an operation started with
    /// [`WorkQueue::begin_operation`](crate::WorkQueue::begin_operation).
    ///
    /// The outstanding counter is decremented once the action has run, even if
    /// it failed.
    pub fn completion<F>(action: F) -> Self
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()> + Send + 'static,
    {
        Self::new(action).counted()
    }

    pub(crate) fn settle(ticket: Ticket, outcome: HostResult) -> Self {
        Self::from_kind(WorkKind::Settle { ticket, outcome }).counted()
    }

    pub(crate) fn engine_job() -> Self {
        Self::from_kind(WorkKind::EngineJob)
    }

    /// Attach a release action. It runs once, after the item ran or when it is
    /// discarded without running.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn completes_operation(&self) -> bool {
        self.completes_operation
    }

    fn from_kind(kind: WorkKind) -> Self {
        Self {
            kind,
            completes_operation: false,
            release: None,
        }
    }

    fn counted(mut self) -> Self {
        self.completes_operation = true;
        self
    }

    /// Split the item into what to run and a guard that releases it.
    pub(crate) fn into_parts(mut self) -> (WorkKind, ReleaseGuard) {
        let kind = std::mem::replace(&mut self.kind, WorkKind::EngineJob);
        let guard = ReleaseGuard(self.release.take());
        (kind, guard)
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            WorkKind::Run(_) => "run".to_string(),
            WorkKind::Settle { ticket, .. } => format!("settle({ticket})"),
            WorkKind::EngineJob => "engine-job".to_string(),
        };
        f.debug_struct("WorkItem")
            .field("kind", &kind)
            .field("completes_operation", &self.completes_operation)
            .finish()
    }
}

/// Runs an item's release action when dropped.
pub(crate) struct ReleaseGuard(Option<ReleaseFn>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}
