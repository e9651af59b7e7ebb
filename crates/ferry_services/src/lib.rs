//! Ferry Services Layer
//!
//! Settings and the host functions scripts can call.

pub mod functions;
pub mod settings;

pub use functions::EchoSink;
pub use settings::{HostSettings, SettingsError};

use ferry_script::{ScriptError, ScriptRuntime};

/// Name of the global object the host functions live on.
pub const HOST_OBJECT: &str = "host";

/// Install every host function on the `host` global.
pub fn install(
    script: &ScriptRuntime,
    settings: &HostSettings,
    echo: EchoSink,
) -> Result<(), ScriptError> {
    let work_delay = settings.work_delay();
    let client = reqwest::Client::new();

    let entries = [
        ("echo", functions::echo(echo)),
        ("doSuccessfulWork", functions::do_successful_work(work_delay)),
        ("doUnsuccessfulWork", functions::do_unsuccessful_work(work_delay)),
        ("delay", functions::delay()),
        ("getUrl", functions::get_url(client, settings.fetch_timeout())),
    ];

    for (name, function) in entries {
        script.define_host_callback(HOST_OBJECT, name, function)?;
    }
    tracing::info!(count = script.callbacks().len(), "host services installed");
    Ok(())
}
