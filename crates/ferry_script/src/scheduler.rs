//! Task scheduler: the pump and the two promise bridges
//!
//! Everything here runs on the engine thread. The only thing handed to other
//! threads is the [`WorkQueue`]; host operations finish by enqueueing a
//! settle item, never by calling into the engine.
//!
//! ```text
//! script                         scheduler                      tokio worker
//! ------                         ---------                      ------------
//! host.fetch()  --------------> begin_operation, ctx.promise()
//!   <- pending promise           retain resolve/reject[ticket]
//!                                spawn operation  ------------> operation.await
//!                                                               enqueue Settle(ticket)
//! [pump] <--------------------- Settle(ticket)
//!   resolve(value) / reject(Error)
//!   complete_operation, release ticket
//! ```

use crate::completion::{Completion, Settlement};
use crate::error::{HostError, HostResult, Rejection, ScriptError};
use crate::queue::{Next, WorkQueue};
use crate::value::ScriptValue;
use crate::work::{WorkItem, WorkKind};
use rquickjs::function::{Rest, This};
use rquickjs::{Context, Ctx, Exception, Function, Persistent, Runtime, Value};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Identifies one bridged operation or one observed promise.
pub type Ticket = u64;

/// What a pump run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub items_run: usize,
    pub engine_jobs: usize,
    pub failures: usize,
}

/// Resolve/reject pair retained until its promise settles.
struct BridgeHandle {
    resolve: Persistent<Function<'static>>,
    reject: Persistent<Function<'static>>,
}

impl BridgeHandle {
    fn retain<'js>(ctx: &Ctx<'js>, resolve: Function<'js>, reject: Function<'js>) -> Self {
        Self {
            resolve: Persistent::save(ctx, resolve),
            reject: Persistent::save(ctx, reject),
        }
    }
}

type HandleTable = RefCell<HashMap<Ticket, BridgeHandle>>;

/// Engine-side half of the scheduler.
pub struct TaskScheduler {
    queue: WorkQueue,
    workers: Handle,
    next_ticket: Cell<Ticket>,
    /// Host operations awaiting their settle item.
    pending: HandleTable,
    /// Resolvers handed to observed promises' `then`.
    observers: Rc<HandleTable>,
    engine_job_queued: Arc<AtomicBool>,
    pumping: Cell<bool>,
}

impl TaskScheduler {
    /// `workers` runs host operations; it is usually a multi-thread runtime.
    pub fn new(queue: WorkQueue, workers: Handle) -> Self {
        Self {
            queue,
            workers,
            next_ticket: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
            observers: Rc::new(RefCell::new(HashMap::new())),
            engine_job_queued: Arc::new(AtomicBool::new(false)),
            pumping: Cell::new(false),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Number of bridged host operations not yet settled.
    pub fn pending_operations(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Number of observed promises not yet settled.
    pub fn pending_observers(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Drain the queue until nothing is queued and nothing is outstanding.
    ///
    /// Start it only after the initial script evaluation, so the promise
    /// reactions that evaluation scheduled are already pending.
    pub async fn pump(
        &self,
        runtime: &Runtime,
        context: &Context,
    ) -> Result<PumpStats, ScriptError> {
        if self.pumping.replace(true) {
            return Err(ScriptError::PumpReentered);
        }
        let _pumping = PumpingFlag(&self.pumping);

        let mut stats = PumpStats::default();
        self.schedule_engine_jobs(runtime);

        loop {
            match self.queue.next() {
                Next::Run(item) => {
                    self.run_item(item, runtime, context, &mut stats);
                    self.schedule_engine_jobs(runtime);
                }
                Next::Wait => {
                    tracing::trace!(
                        outstanding = self.queue.outstanding(),
                        "pump waiting for host completions"
                    );
                    self.queue.wait().await;
                }
                Next::Quiescent => break,
            }
        }

        tracing::debug!(
            items = stats.items_run,
            engine_jobs = stats.engine_jobs,
            failures = stats.failures,
            "pump quiescent"
        );
        Ok(stats)
    }

    fn run_item(
        &self,
        item: WorkItem,
        runtime: &Runtime,
        context: &Context,
        stats: &mut PumpStats,
    ) {
        let counted = item.completes_operation();
        let (kind, _release) = item.into_parts();

        let result = match kind {
            WorkKind::Run(action) => context.with(|ctx| {
                action(&ctx).map_err(|err| ScriptError::from_engine(&ctx, err))
            }),
            WorkKind::Settle { ticket, outcome } => context.with(|ctx| {
                self.settle(&ctx, ticket, outcome)
                    .map_err(|err| ScriptError::from_engine(&ctx, err))
            }),
            WorkKind::EngineJob => {
                stats.engine_jobs += 1;
                run_engine_job(runtime)
            }
        };

        if counted {
            self.queue.complete_operation();
        }
        stats.items_run += 1;

        if let Err(err) = result {
            stats.failures += 1;
            tracing::error!(error = %err, "work item failed");
        }
    }

    /// Engine continuation hook: QuickJS keeps reactions in its own job list,
    /// so a marker item is queued whenever jobs are pending. One marker at a
    /// time; its release clears the flag.
    fn schedule_engine_jobs(&self, runtime: &Runtime) {
        if !runtime.is_job_pending() || self.engine_job_queued.swap(true, Ordering::AcqRel) {
            return;
        }

        let flag = self.engine_job_queued.clone();
        self.queue.enqueue(
            WorkItem::engine_job().with_release(move || flag.store(false, Ordering::Release)),
        );
    }

    /// Future→promise bridge.
    ///
    /// Returns a pending engine promise at once. `operation` runs on the
    /// worker pool; its outcome comes back as a settle item and is delivered
    /// on the engine thread by the pump.
    pub fn promise_from_future<'js, F>(
        &self,
        ctx: &Ctx<'js>,
        operation: F,
    ) -> rquickjs::Result<Value<'js>>
    where
        F: Future<Output = HostResult> + Send + 'static,
    {
        self.queue.begin_operation();

        let (promise, resolve, reject) = match ctx.promise() {
            Ok(parts) => parts,
            Err(err) => {
                self.queue.complete_operation();
                return Err(err);
            }
        };

        let ticket = self.issue_ticket();
        self.pending
            .borrow_mut()
            .insert(ticket, BridgeHandle::retain(ctx, resolve, reject));
        tracing::debug!(
            ticket,
            outstanding = self.queue.outstanding(),
            "host operation started"
        );

        let queue = self.queue.clone();
        let workers = self.workers.clone();
        self.workers.spawn(async move {
            let outcome = match workers.spawn(operation).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_cancelled() => Err(HostError::Cancelled),
                Err(err) => Err(HostError::Panicked(panic_message(err.into_panic()))),
            };
            queue.enqueue(WorkItem::settle(ticket, outcome));
        });

        Ok(promise.into_value())
    }

    fn settle<'js>(
        &self,
        ctx: &Ctx<'js>,
        ticket: Ticket,
        outcome: HostResult,
    ) -> rquickjs::Result<()> {
        let Some(handle) = self.pending.borrow_mut().remove(&ticket) else {
            tracing::warn!(ticket, "settlement for unknown operation ignored");
            return Ok(());
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(ticket, "host operation succeeded");
                let resolve = handle.resolve.restore(ctx)?;
                resolve.call::<_, ()>((value,))
            }
            Err(err) => {
                let message = err.engine_message();
                tracing::debug!(ticket, %message, "host operation failed");
                let reject = handle.reject.restore(ctx)?;
                let error = Exception::from_message(ctx.clone(), &message)?;
                reject.call::<_, ()>((error.into_object(),))
            }
        }
    }

    /// Promise→future bridge.
    ///
    /// Hands two resolvers to the value's `then` and returns a completion
    /// that settles when the engine calls one of them. Nothing is queued here;
    /// the engine's own reaction jobs drive the resolvers, so the completion
    /// only settles while the pump runs.
    pub fn promise_to_future<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: Value<'js>,
    ) -> Result<Completion, ScriptError> {
        let then = then_function(&value).ok_or(ScriptError::NotAPromise)?;

        let ticket = self.issue_ticket();
        let (completion, sender) = Completion::channel();
        let slot = Rc::new(SettleSlot {
            ticket,
            sender: RefCell::new(Some(sender)),
            observers: Rc::downgrade(&self.observers),
        });

        let resolve = Function::new(ctx.clone(), {
            let slot = slot.clone();
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                let value = args
                    .0
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| Value::new_undefined(ctx.clone()));
                slot.settle(Ok(ScriptValue::save(&value)));
            }
        })?;

        let reject = Function::new(ctx.clone(), {
            let slot = slot.clone();
            move |args: Rest<Value<'js>>| {
                let rejection = match args.0.into_iter().next() {
                    Some(reason) => Rejection::new(reason),
                    None => Rejection::unknown(),
                };
                slot.settle(Err(rejection));
            }
        })?;

        self.observers.borrow_mut().insert(
            ticket,
            BridgeHandle::retain(ctx, resolve.clone(), reject.clone()),
        );
        tracing::trace!(ticket, "observing promise");

        if let Err(err) = then.call::<_, Value>((This(value), resolve, reject)) {
            self.observers.borrow_mut().remove(&ticket);
            return Err(ScriptError::from_engine(ctx, err));
        }

        Ok(completion)
    }

    /// Release every retained resolver and discard queued work.
    ///
    /// Called at runtime teardown. Observed promises that never settled
    /// complete as abandoned.
    pub fn release_all(&self) {
        let operations = self.pending.borrow_mut().drain().count();
        let observers = self.observers.borrow_mut().drain().count();
        let discarded = self.queue.clear();
        tracing::debug!(operations, observers, discarded, "scheduler released");
    }

    fn issue_ticket(&self) -> Ticket {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);
        ticket
    }
}

/// Returns the `then` function of a promise or thenable.
pub fn then_function<'js>(value: &Value<'js>) -> Option<Function<'js>> {
    value
        .as_object()?
        .get::<_, Value>("then")
        .ok()?
        .into_function()
}

/// Single-assignment sink shared by one observed promise's resolvers.
struct SettleSlot {
    ticket: Ticket,
    sender: RefCell<Option<oneshot::Sender<Settlement>>>,
    observers: Weak<HandleTable>,
}

impl SettleSlot {
    fn settle(&self, settlement: Settlement) {
        let Some(sender) = self.sender.borrow_mut().take() else {
            tracing::trace!(ticket = self.ticket, "repeat settlement ignored");
            return;
        };

        // The host may have stopped waiting; that is fine.
        let _ = sender.send(settlement);

        if let Some(observers) = self.observers.upgrade() {
            observers.borrow_mut().remove(&self.ticket);
        }
    }
}

struct PumpingFlag<'a>(&'a Cell<bool>);

impl Drop for PumpingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn run_engine_job(runtime: &Runtime) -> Result<(), ScriptError> {
    match runtime.execute_pending_job() {
        Ok(_) => Ok(()),
        Err(job) => Err(job
            .0
            .with(|ctx| ScriptError::from_engine(&ctx, rquickjs::Error::Exception))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text.to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown panic".to_string())
}
