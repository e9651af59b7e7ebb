//! Host functions exposed to scripts
//!
//! Synchronous ones run straight on the engine thread. Asynchronous ones copy
//! what they need out of their arguments first; the returned future runs on
//! the worker pool and never sees an engine value.

use ferry_script::rquickjs::convert::Coerced;
use ferry_script::rquickjs::{Exception, Value};
use ferry_script::{host_future, HostError, HostFunction, HostValue};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Text produced by the demo work functions.
pub const WORK_MESSAGE: &str = "promise from native code";

/// Destination of `host.echo`.
pub type EchoSink = Arc<Mutex<dyn Write + Send>>;

/// `host.echo(...args)`: writes its arguments as one space separated line.
pub fn echo(sink: EchoSink) -> HostFunction {
    HostFunction::sync(move |ctx, args| {
        let mut line = String::new();
        for (index, arg) in args.iter().enumerate() {
            if index > 0 {
                line.push(' ');
            }
            let text: Coerced<String> = arg.get()?;
            line.push_str(&text.0);
        }
        line.push('\n');

        let mut sink = sink.lock();
        sink.write_all(line.as_bytes())
            .and_then(|_| sink.flush())
            .map_err(|err| Exception::throw_message(ctx, &format!("echo failed: {err}")))?;
        Ok(Value::new_undefined(ctx.clone()))
    })
}

/// `host.doSuccessfulWork()`
pub fn do_successful_work(delay: Duration) -> HostFunction {
    HostFunction::asynchronous(move |_ctx, _args| {
        Ok(host_future(async move {
            tokio::time::sleep(delay).await;
            Ok(HostValue::from(WORK_MESSAGE))
        }))
    })
}

/// `host.doUnsuccessfulWork()`
pub fn do_unsuccessful_work(delay: Duration) -> HostFunction {
    HostFunction::asynchronous(move |_ctx, _args| {
        Ok(host_future(async move {
            tokio::time::sleep(delay).await;
            Err(HostError::failed(WORK_MESSAGE))
        }))
    })
}

/// `host.delay(ms, value?)`: resolves with `value` after `ms` milliseconds.
pub fn delay() -> HostFunction {
    HostFunction::asynchronous(|_ctx, args| {
        let millis = args
            .first()
            .and_then(|value| value.as_number())
            .filter(|millis| millis.is_finite() && *millis > 0.0)
            .unwrap_or(0.0);
        let value = match args.get(1) {
            Some(value) => HostValue::from_js(value)?,
            None => HostValue::Undefined,
        };

        Ok(host_future(async move {
            tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            Ok(value)
        }))
    })
}

/// `host.getUrl(url)`: body of an HTTP GET, as text.
pub fn get_url(client: reqwest::Client, timeout: Duration) -> HostFunction {
    HostFunction::asynchronous(move |_ctx, args| {
        let url = match args.first() {
            Some(value) if !value.is_undefined() && !value.is_null() => {
                Some(value.get::<Coerced<String>>()?.0)
            }
            _ => None,
        };
        let client = client.clone();

        Ok(host_future(async move {
            let Some(url) = url else {
                return Err(HostError::failed("getUrl requires a URL argument"));
            };
            tracing::debug!(%url, "fetching");

            let request = async {
                client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            };
            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(body)) => Ok(HostValue::from(body)),
                Ok(Err(err)) => Err(HostError::failed(err.to_string())),
                Err(_) => Err(HostError::failed(format!(
                    "request to {url} timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        }))
    })
}
