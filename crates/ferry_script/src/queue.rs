//! Work queue and outstanding-operation accounting
//!
//! The queue and the outstanding counter live behind one lock so the pump can
//! decide "empty and nothing in flight" atomically. The wake signal is a
//! [`Notify`]: `notify_one` stores a permit when nobody is waiting, so an
//! enqueue racing the pump's emptiness check still wakes it.

use crate::work::WorkItem;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// What the pump should do next.
#[derive(Debug)]
pub enum Next {
    /// Run this item.
    Run(WorkItem),
    /// Nothing queued, but host operations are still in flight.
    Wait,
    /// Nothing queued and nothing in flight.
    Quiescent,
}

#[derive(Default)]
struct State {
    items: VecDeque<WorkItem>,
    outstanding: usize,
}

struct Shared {
    state: Mutex<State>,
    wake: Notify,
}

/// Thread-safe FIFO of work items bound for the engine thread.
///
/// Cloning yields another handle to the same queue. Unbounded: a burst of
/// completions grows memory without limit.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wake: Notify::new(),
            }),
        }
    }

    /// Append an item and wake the pump. Safe from any thread.
    pub fn enqueue(&self, item: WorkItem) {
        let queued = {
            let mut state = self.shared.state.lock();
            state.items.push_back(item);
            state.items.len()
        };
        tracing::trace!(queued, "work item enqueued");
        self.shared.wake.notify_one();
    }

    /// Record that a host operation started; keeps the pump alive until the
    /// matching counted item has run.
    pub fn begin_operation(&self) {
        let mut state = self.shared.state.lock();
        state.outstanding += 1;
        tracing::trace!(outstanding = state.outstanding, "operation started");
    }

    /// Record that a host operation's completion has run.
    pub fn complete_operation(&self) {
        let mut state = self.shared.state.lock();
        debug_assert!(state.outstanding > 0, "outstanding counter underflow");
        state.outstanding = state.outstanding.saturating_sub(1);
        tracing::trace!(outstanding = state.outstanding, "operation completed");
    }

    /// Take the head item, or report whether to wait or stop.
    pub fn next(&self) -> Next {
        let mut state = self.shared.state.lock();
        match state.items.pop_front() {
            Some(item) => Next::Run(item),
            None if state.outstanding > 0 => Next::Wait,
            None => Next::Quiescent,
        }
    }

    /// Wait for the next enqueue. May return spuriously; callers re-check.
    pub async fn wait(&self) {
        self.shared.wake.notified().await;
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Drop every queued item, running their release actions.
    pub fn clear(&self) -> usize {
        let drained: Vec<WorkItem> = self.shared.state.lock().items.drain(..).collect();
        drained.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
