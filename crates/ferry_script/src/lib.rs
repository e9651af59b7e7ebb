//! Ferry Scripting Host
//!
//! JavaScript execution via QuickJS with a promise bridge to tokio.
//!
//! ## Architecture
//!
//! - **Engine thread:** the thread owning [`ScriptRuntime`]; the only one allowed
//!   to touch engine values. `ScriptRuntime` is `!Send` to enforce it.
//! - **Work queue:** [`WorkQueue`] is the single path from any thread onto the
//!   engine thread. The pump drains it until nothing is queued or outstanding.
//! - **Bridges:** engine promise → host [`Completion`], and host future →
//!   engine promise.
//! - **Callbacks:** host functions live in the process-wide
//!   [`CallbackRegistry`] for the lifetime of their runtime.
//!
//! ```ignore
//! let script = ScriptRuntime::new(tokio_handle)?;
//! script.define_host_callback("host", "wait", HostFunction::asynchronous(|_, _| {
//!     Ok(host_future(async { Ok(HostValue::from("done")) }))
//! }))?;
//! let result = script.execute("host.wait()")?;
//! let completion = script.to_future(&result)?;
//! script.pump().await?;
//! let value = completion.await.map_err(|rejection| rejection.message().to_string())?;
//! ```

pub mod callback;
pub mod completion;
pub mod error;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod value;
pub mod work;

pub use callback::{
    host_future, live_callbacks, CallbackRegistry, HostCallback, HostFunction, HostFuture,
};
pub use completion::{Completion, Settlement};
pub use error::{HostError, HostResult, Rejection, ScriptError};
pub use queue::{Next, WorkQueue};
pub use runtime::ScriptRuntime;
pub use scheduler::{PumpStats, TaskScheduler, Ticket};
pub use value::{HostValue, ScriptValue};
pub use work::WorkItem;

pub use rquickjs;
