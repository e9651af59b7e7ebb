//! Values crossing the host/engine boundary
//!
//! [`ScriptValue`] keeps an engine value alive between `Context::with` calls on
//! the engine thread. [`HostValue`] is what host operations produce on any
//! thread; it only becomes an engine value once a work item runs.

use rquickjs::{Ctx, IntoJs, Persistent, Value};
use std::fmt;

/// An engine value retained outside of a context scope.
///
/// Must be dropped before the runtime that created it.
#[derive(Clone)]
pub struct ScriptValue(Persistent<Value<'static>>);

impl ScriptValue {
    pub fn save(value: &Value<'_>) -> Self {
        Self(Persistent::save(value.ctx(), value.clone()))
    }

    pub fn restore<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        self.0.clone().restore(ctx)
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptValue {{ .. }}")
    }
}

/// Result value of a host operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl<'js> IntoJs<'js> for HostValue {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            HostValue::Undefined => Ok(Value::new_undefined(ctx.clone())),
            HostValue::Null => Ok(Value::new_null(ctx.clone())),
            HostValue::Bool(value) => value.into_js(ctx),
            HostValue::Number(value) => value.into_js(ctx),
            HostValue::String(value) => value.into_js(ctx),
        }
    }
}

impl HostValue {
    /// Copy a primitive engine value out of the engine.
    ///
    /// Objects and functions have no host representation; they are coerced
    /// to their string form.
    pub fn from_js(value: &Value<'_>) -> rquickjs::Result<Self> {
        if value.is_undefined() {
            return Ok(HostValue::Undefined);
        }
        if value.is_null() {
            return Ok(HostValue::Null);
        }
        if let Some(flag) = value.as_bool() {
            return Ok(HostValue::Bool(flag));
        }
        if let Some(number) = value.as_number() {
            return Ok(HostValue::Number(number));
        }

        let text: rquickjs::convert::Coerced<String> = value.get()?;
        Ok(HostValue::String(text.0))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}
