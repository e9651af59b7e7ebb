//! Error types for script execution and the promise bridges

use crate::value::ScriptValue;
use rquickjs::{Ctx, Value};
use thiserror::Error;

/// Message used when a host operation fails without saying why.
pub const UNKNOWN_HOST_FAILURE: &str = "Unknown error in host operation.";

/// Message used when a promise is rejected without a reason.
pub const UNKNOWN_REJECTION: &str = "Unknown exception in JavaScript promise rejection.";

/// Errors raised while hosting scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script exception: {message}")]
    Script {
        message: String,
        stack: Option<String>,
    },

    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("value is not a promise or thenable")]
    NotAPromise,

    #[error("the pump is already running on this runtime")]
    PumpReentered,
}

impl ScriptError {
    /// Convert an engine error into a [`ScriptError`], pulling the pending
    /// exception out of the context when there is one.
    pub fn from_engine(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        if !err.is_exception() {
            return ScriptError::Engine(err);
        }

        let thrown = ctx.catch();
        ScriptError::Script {
            message: describe_reason(&thrown),
            stack: thrown
                .as_object()
                .and_then(|obj| obj.get::<_, Option<String>>("stack").ok().flatten()),
        }
    }
}

/// Failure of a host asynchronous operation.
///
/// Cancellation and panics are ordinary failures; all of them reach scripts as
/// promise rejections.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("{0}")]
    Failed(String),

    #[error("host operation was cancelled")]
    Cancelled,

    #[error("host operation panicked: {0}")]
    Panicked(String),

    #[error("{}", UNKNOWN_HOST_FAILURE)]
    Unknown,
}

impl HostError {
    pub fn failed(message: impl Into<String>) -> Self {
        HostError::Failed(message.into())
    }

    /// The failure's own message, if it carries a non-empty one.
    pub fn message(&self) -> Option<String> {
        match self {
            HostError::Failed(message) if message.trim().is_empty() => None,
            HostError::Unknown => None,
            other => Some(other.to_string()),
        }
    }

    /// Text for the engine `Error` built from this failure.
    pub fn engine_message(&self) -> String {
        self.message()
            .unwrap_or_else(|| UNKNOWN_HOST_FAILURE.to_string())
    }
}

/// Outcome of a host asynchronous operation.
pub type HostResult = Result<crate::value::HostValue, HostError>;

/// A settled-as-rejected engine promise.
///
/// The reason is kept verbatim; it can be any engine value, not only an
/// `Error`. Holds engine references, so it stays on the engine thread.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Rejection {
    reason: Option<ScriptValue>,
    message: String,
}

impl Rejection {
    pub fn new<'js>(reason: Value<'js>) -> Self {
        let message = describe_reason(&reason);
        Self {
            reason: Some(ScriptValue::save(&reason)),
            message,
        }
    }

    /// Rejection whose resolver was called without a reason.
    pub fn unknown() -> Self {
        Self {
            reason: None,
            message: UNKNOWN_REJECTION.to_string(),
        }
    }

    pub(crate) fn abandoned() -> Self {
        Self {
            reason: None,
            message: "promise abandoned before settlement".to_string(),
        }
    }

    pub fn reason(&self) -> Option<&ScriptValue> {
        self.reason.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Human-readable text for a thrown or rejected value.
///
/// Error-like objects give their `message`; everything else is coerced the
/// way `String(value)` would. Exceptions thrown while looking are caught so
/// none stays pending on the context.
pub(crate) fn describe_reason(value: &Value<'_>) -> String {
    let ctx = value.ctx();

    if let Some(obj) = value.as_object() {
        match obj.get::<_, Option<String>>("message") {
            Ok(Some(message)) => return message,
            Ok(None) => {}
            Err(err) => discard_exception(ctx, &err),
        }
    }

    if let Some(symbol) = value.as_symbol() {
        let description = symbol
            .description()
            .and_then(|description| description.get::<Option<String>>());
        return match description {
            Ok(text) => format!("Symbol({})", text.unwrap_or_default()),
            Err(err) => {
                discard_exception(ctx, &err);
                "Symbol()".to_string()
            }
        };
    }

    match value.get::<rquickjs::convert::Coerced<String>>() {
        Ok(coerced) => coerced.0,
        Err(err) => {
            discard_exception(ctx, &err);
            format!("<{:?}>", value.type_of())
        }
    }
}

fn discard_exception(ctx: &Ctx<'_>, err: &rquickjs::Error) {
    if err.is_exception() {
        let thrown = ctx.catch();
        tracing::trace!(?thrown, "exception while describing a value discarded");
    }
}
