//! Script runtime management
//!
//! Owns the QuickJS runtime and context together with the scheduler and the
//! callback registry. The owning thread is the engine thread; the type is
//! `!Send` so it cannot leave it.

use crate::callback::{native_function, CallbackRegistry, HostFunction};
use crate::completion::Completion;
use crate::error::ScriptError;
use crate::queue::WorkQueue;
use crate::scheduler::{then_function, PumpStats, TaskScheduler};
use crate::value::{HostValue, ScriptValue};
use rquickjs::convert::Coerced;
use rquickjs::function::{Rest, This};
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use std::path::Path;
use std::rc::Rc;
use tokio::runtime::Handle;

/// Script execution context
pub struct ScriptRuntime {
    callbacks: CallbackRegistry,
    scheduler: Rc<TaskScheduler>,
    context: Context,
    runtime: Runtime,
}

impl ScriptRuntime {
    /// `workers` is where asynchronous host functions run.
    pub fn new(workers: Handle) -> Result<Self, ScriptError> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;
        let scheduler = Rc::new(TaskScheduler::new(WorkQueue::new(), workers));

        Ok(Self {
            callbacks: CallbackRegistry::new(),
            scheduler,
            context,
            runtime,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Queue handle for host code that wants to run work on the engine thread.
    pub fn queue(&self) -> &WorkQueue {
        self.scheduler.queue()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn execute_file(&self, path: &Path) -> Result<ScriptValue, ScriptError> {
        let source = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "executing script file");
        self.execute(&source)
    }

    /// Evaluate a script and keep its completion value.
    pub fn execute(&self, source: &str) -> Result<ScriptValue, ScriptError> {
        self.context.with(|ctx| {
            let value: Value = ctx
                .eval(source)
                .map_err(|err| ScriptError::from_engine(&ctx, err))?;
            Ok(ScriptValue::save(&value))
        })
    }

    /// Call a global JavaScript function by name.
    pub fn call_function(
        &self,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<ScriptValue, ScriptError> {
        self.context.with(|ctx| {
            let call = || -> rquickjs::Result<ScriptValue> {
                let func: Function = ctx.globals().get(name)?;
                let value: Value = func.call((Rest(args),))?;
                Ok(ScriptValue::save(&value))
            };
            call().map_err(|err| ScriptError::from_engine(&ctx, err))
        })
    }

    /// Call `target[name](...args)` with `target` as `this`.
    pub fn call_method(
        &self,
        target: &ScriptValue,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<ScriptValue, ScriptError> {
        self.context.with(|ctx| {
            let call = || -> rquickjs::Result<ScriptValue> {
                let this = target.restore(&ctx)?;
                let object: Object = this.get()?;
                let func: Function = object.get(name)?;
                let value: Value = func.call((This(this), Rest(args)))?;
                Ok(ScriptValue::save(&value))
            };
            call().map_err(|err| ScriptError::from_engine(&ctx, err))
        })
    }

    /// Whether `target` is an object with a callable `name` property.
    pub fn has_method(&self, target: &ScriptValue, name: &str) -> bool {
        self.context.with(|ctx| {
            target
                .restore(&ctx)
                .ok()
                .and_then(|value| value.into_object())
                .and_then(|object| object.get::<_, Value>(name).ok())
                .is_some_and(|member| member.is_function())
        })
    }

    /// Whether `value` is a promise or another object with a callable `then`.
    pub fn is_thenable(&self, value: &ScriptValue) -> bool {
        self.context.with(|ctx| {
            value
                .restore(&ctx)
                .ok()
                .and_then(|value| then_function(&value))
                .is_some()
        })
    }

    /// Observe a promise from the host. See [`TaskScheduler::promise_to_future`].
    pub fn to_future(&self, value: &ScriptValue) -> Result<Completion, ScriptError> {
        self.context.with(|ctx| {
            let value = value
                .restore(&ctx)
                .map_err(|err| ScriptError::from_engine(&ctx, err))?;
            self.scheduler.promise_to_future(&ctx, value)
        })
    }

    /// String form of a value, as `String(value)` would produce.
    pub fn display(&self, value: &ScriptValue) -> Result<String, ScriptError> {
        self.context.with(|ctx| {
            let convert = || -> rquickjs::Result<String> {
                let text: Coerced<String> = value.restore(&ctx)?.get()?;
                Ok(text.0)
            };
            convert().map_err(|err| ScriptError::from_engine(&ctx, err))
        })
    }

    pub fn to_host(&self, value: &ScriptValue) -> Result<HostValue, ScriptError> {
        self.context.with(|ctx| {
            value
                .restore(&ctx)
                .and_then(|value| HostValue::from_js(&value))
                .map_err(|err| ScriptError::from_engine(&ctx, err))
        })
    }

    /// Install `function` as `globalThis[object][name]`, creating the object
    /// when it does not exist yet.
    pub fn define_host_callback(
        &self,
        object: &str,
        name: &str,
        function: HostFunction,
    ) -> Result<(), ScriptError> {
        let callback = self.callbacks.register(name, function);

        self.context.with(|ctx| {
            let define = |ctx: &Ctx<'_>| -> rquickjs::Result<()> {
                let globals = ctx.globals();
                let target: Object = match globals.get::<_, Option<Object>>(object)? {
                    Some(existing) => existing,
                    None => {
                        let created = Object::new(ctx.clone())?;
                        globals.set(object, created.clone())?;
                        created
                    }
                };
                let function = native_function(ctx, name, callback, self.scheduler.clone())?;
                target.set(name, function)
            };
            define(&ctx).map_err(|err| ScriptError::from_engine(&ctx, err))
        })
    }

    /// Run the event loop until quiescent.
    pub async fn pump(&self) -> Result<PumpStats, ScriptError> {
        self.scheduler.pump(&self.runtime, &self.context).await
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        // Retained engine references must go before the runtime does.
        self.scheduler.release_all();
        self.callbacks.release_all();
    }
}
