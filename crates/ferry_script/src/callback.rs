// callback.rs - Host functions callable from scripts
//
// Every adapter lives in one process-wide registry for as long as its runtime
// exists. Engine functions only hold a `Weak` to their adapter; the registry
// holds the strong reference and drops all of a runtime's entries at teardown.

use crate::error::HostResult;
use crate::scheduler::TaskScheduler;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Future returned by asynchronous host functions. Runs on the worker pool.
pub type HostFuture = Pin<Box<dyn Future<Output = HostResult> + Send + 'static>>;

/// Box a host operation for [`HostFunction::asynchronous`].
pub fn host_future<F>(operation: F) -> HostFuture
where
    F: Future<Output = HostResult> + Send + 'static,
{
    Box::pin(operation)
}

/// Synchronous host function: called straight through on the engine thread.
pub type SyncHostFn =
    dyn for<'js> Fn(&Ctx<'js>, Vec<Value<'js>>) -> rquickjs::Result<Value<'js>> + Send + Sync;

/// Asynchronous host function: reads its arguments on the engine thread and
/// returns a future that must not capture engine values.
pub type AsyncHostFn =
    dyn for<'js> Fn(&Ctx<'js>, Vec<Value<'js>>) -> rquickjs::Result<HostFuture> + Send + Sync;

/// A host function, tagged by calling convention.
#[derive(Clone)]
pub enum HostFunction {
    Sync(Arc<SyncHostFn>),
    Async(Arc<AsyncHostFn>),
}

impl HostFunction {
    pub fn sync<F>(function: F) -> Self
    where
        F: for<'js> Fn(&Ctx<'js>, Vec<Value<'js>>) -> rquickjs::Result<Value<'js>>
            + Send
            + Sync
            + 'static,
    {
        HostFunction::Sync(Arc::new(function))
    }

    pub fn asynchronous<F>(function: F) -> Self
    where
        F: for<'js> Fn(&Ctx<'js>, Vec<Value<'js>>) -> rquickjs::Result<HostFuture>
            + Send
            + Sync
            + 'static,
    {
        HostFunction::Async(Arc::new(function))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, HostFunction::Async(_))
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFunction::Sync(_) => write!(f, "HostFunction::Sync"),
            HostFunction::Async(_) => write!(f, "HostFunction::Async"),
        }
    }
}

pub type CallbackId = u64;

/// A registered host function adapter.
#[derive(Debug)]
pub struct HostCallback {
    id: CallbackId,
    name: String,
    function: HostFunction,
}

impl HostCallback {
    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sync functions return their value; async ones go through the
    /// future→promise bridge and return a pending promise.
    pub(crate) fn invoke<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: Vec<Value<'js>>,
        scheduler: &TaskScheduler,
    ) -> rquickjs::Result<Value<'js>> {
        match &self.function {
            HostFunction::Sync(function) => function(ctx, args),
            HostFunction::Async(function) => {
                let operation = function(ctx, args)?;
                scheduler.promise_from_future(ctx, operation)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CallbackKey {
    runtime: u64,
    callback: CallbackId,
}

/// Process-wide liveness anchor for host callbacks.
static CALLBACKS: Lazy<DashMap<CallbackKey, Arc<HostCallback>>> = Lazy::new(DashMap::new);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Number of host callbacks alive across all runtimes.
pub fn live_callbacks() -> usize {
    CALLBACKS.len()
}

/// One runtime's view of the process-wide callback store.
///
/// Dropping it releases every callback the runtime registered.
pub struct CallbackRegistry {
    runtime: u64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self { runtime: next_id() }
    }

    pub fn register(&self, name: &str, function: HostFunction) -> Weak<HostCallback> {
        let callback = Arc::new(HostCallback {
            id: next_id(),
            name: name.to_string(),
            function,
        });
        let weak = Arc::downgrade(&callback);

        tracing::debug!(
            name,
            id = callback.id,
            is_async = callback.function.is_async(),
            "host callback registered"
        );
        CALLBACKS.insert(
            CallbackKey {
                runtime: self.runtime,
                callback: callback.id,
            },
            callback,
        );
        weak
    }

    pub fn len(&self) -> usize {
        CALLBACKS
            .iter()
            .filter(|entry| entry.key().runtime == self.runtime)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every callback of this runtime. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let mut released = 0;
        CALLBACKS.retain(|key, _| {
            if key.runtime == self.runtime {
                released += 1;
                return false;
            }
            true
        });
        if released > 0 {
            tracing::debug!(released, "host callbacks released");
        }
        released
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallbackRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Build the engine function for a registered callback.
pub(crate) fn native_function<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    callback: Weak<HostCallback>,
    scheduler: Rc<TaskScheduler>,
) -> rquickjs::Result<Function<'js>> {
    let released = format!("host callback '{name}' has been released");
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let Some(callback) = callback.upgrade() else {
                return Err(Exception::throw_message(&ctx, &released));
            };
            tracing::trace!(name = callback.name(), "host callback invoked");
            callback.invoke(&ctx, args.0, &scheduler)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostValue;
    use rquickjs::IntoJs;

    fn constant(text: &'static str) -> HostFunction {
        HostFunction::sync(move |ctx, _args| HostValue::from(text).into_js(ctx))
    }

    #[test]
    fn registry_holds_callbacks_until_released() {
        let registry = CallbackRegistry::new();
        let first = registry.register("first", constant("a"));
        let second = registry.register("second", constant("b"));
        assert_eq!(registry.len(), 2);
        assert!(live_callbacks() >= 2);
        assert!(first.upgrade().is_some());

        assert_eq!(registry.release_all(), 2);
        assert!(registry.is_empty());
        assert!(first.upgrade().is_none());
        assert!(second.upgrade().is_none());
    }

    #[test]
    fn registries_are_isolated() {
        let left = CallbackRegistry::new();
        let right = CallbackRegistry::new();
        let kept = right.register("kept", constant("r"));
        left.register("dropped", constant("l"));

        drop(left);
        assert_eq!(right.len(), 1);
        assert!(kept.upgrade().is_some());
    }

    #[test]
    fn release_count_ignores_other_runtimes() {
        use std::sync::atomic::AtomicBool;

        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let other = CallbackRegistry::new();
                    for _ in 0..8 {
                        other.register("other", constant("o"));
                    }
                }
            })
        };

        let registry = CallbackRegistry::new();
        for _ in 0..2_000 {
            registry.register("a", constant("a"));
            registry.register("b", constant("b"));
            assert_eq!(registry.release_all(), 2);
        }

        stop.store(true, Ordering::Relaxed);
        churn.join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn tags_are_reported() {
        let sync = constant("x");
        let asynchronous =
            HostFunction::asynchronous(|_ctx, _args| Ok(host_future(async { Ok(HostValue::Null) })));
        assert!(!sync.is_async());
        assert!(asynchronous.is_async());
    }
}
