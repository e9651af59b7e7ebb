//! Ferry Runtime
//!
//! Binary that hosts one script: installs the host services, runs the script,
//! pumps until quiescent and reports what the script produced.

use anyhow::{Context, Result};
use clap::Parser;
use ferry_script::{HostValue, ScriptError, ScriptRuntime, ScriptValue};
use ferry_services::HostSettings;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "Run a script against the ferry host")]
struct Cli {
    /// Script file to run
    script: PathBuf,

    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit without waiting for Enter
    #[arg(long)]
    no_wait: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => HostSettings::load(path),
        None => Ok(HostSettings::default()),
    };
    let (settings, outcome) = match settings {
        Ok(settings) => {
            init_logging(&settings.log_filter);
            let outcome = run(&cli, &settings);
            (settings, outcome)
        }
        Err(err) => (HostSettings::default(), Err(err.into())),
    };

    let code = match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fatal error: internal error: {err:#}");
            ExitCode::FAILURE
        }
    };

    if settings.wait_for_key && !cli.no_wait {
        wait_for_enter();
    }
    code
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli, settings: &HostSettings) -> Result<()> {
    tracing::info!("Ferry v{}", env!("CARGO_PKG_VERSION"));

    let workers = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_threads.max(1))
        .thread_name("ferry-worker")
        .enable_all()
        .build()
        .context("building worker runtime")?;

    let script =
        ScriptRuntime::new(workers.handle().clone()).context("creating script runtime")?;
    ferry_services::install(&script, settings, Arc::new(Mutex::new(io::stdout())))
        .context("installing host services")?;

    workers.block_on(drive(&script, &cli.script))?;

    // Engine references go before the workers that might still hold queue handles.
    drop(script);
    workers.shutdown_timeout(settings.fetch_timeout());
    tracing::info!("host shut down");
    Ok(())
}

/// Run the script and everything it asks of the host.
async fn drive(script: &ScriptRuntime, path: &Path) -> Result<()> {
    let result = match script.execute_file(path) {
        Ok(value) => Some(value),
        Err(err) => {
            report(err)?;
            None
        }
    };

    let completion = match &result {
        Some(value) if script.is_thenable(value) => {
            println!("Script returned a promise, awaiting it.");
            Some(script.to_future(value)?)
        }
        _ => None,
    };

    let stats = script.pump().await?;
    tracing::debug!(?stats, "script drained");

    let Some(result) = result else {
        return Ok(());
    };
    let result = match completion {
        Some(completion) => match completion.await {
            Ok(value) => value,
            Err(rejection) => {
                eprintln!("exception: {}", rejection.message());
                return Ok(());
            }
        },
        None => result,
    };
    println!("Script result: {}", script.display(&result)?);

    if script.has_method(&result, "sayHello") {
        say_hello(script, &result).await?;
    }

    if script.has_method(&result, "add") {
        let args = vec![HostValue::from(78.0), HostValue::from(22.0)];
        match script.call_method(&result, "add", args) {
            Ok(sum) => println!("In host: 78 + 22 = {}", script.display(&sum)?),
            Err(err) => report(err)?,
        }
    }

    Ok(())
}

async fn say_hello(script: &ScriptRuntime, module: &ScriptValue) -> Result<()> {
    let greeting = match script.call_method(module, "sayHello", vec!["do a barrel roll!".into()]) {
        Ok(value) => value,
        Err(err) => return report(err),
    };

    let completion = if script.is_thenable(&greeting) {
        Some(script.to_future(&greeting)?)
    } else {
        None
    };
    script.pump().await?;

    if let Some(completion) = completion {
        if let Err(rejection) = completion.await {
            eprintln!("exception: {}", rejection.message());
        }
    }
    Ok(())
}

/// Script exceptions are reported and survived; anything else is fatal.
fn report(err: ScriptError) -> Result<()> {
    match err {
        ScriptError::Script { message, stack } => {
            eprintln!("exception: {message}");
            if let Some(stack) = stack {
                tracing::debug!(%stack, "script exception stack");
            }
            Ok(())
        }
        other => Err(other.into()),
    }
}

fn wait_for_enter() {
    println!("Press Enter to exit.");
    let mut line = String::new();
    if let Err(err) = io::stdin().read_line(&mut line) {
        tracing::warn!(error = %err, "could not read from stdin");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from(["ferry", "demo.js", "--config", "host.json", "--no-wait"])
            .unwrap();
        assert_eq!(cli.script, PathBuf::from("demo.js"));
        assert_eq!(cli.config, Some(PathBuf::from("host.json")));
        assert!(cli.no_wait);
    }

    #[test]
    fn cli_requires_script() {
        assert!(Cli::try_parse_from(["ferry"]).is_err());
    }

    #[test]
    fn script_exceptions_are_not_fatal() {
        let err = ScriptError::Script {
            message: "boom".to_string(),
            stack: None,
        };
        assert!(report(err).is_ok());
        assert!(report(ScriptError::NotAPromise).is_err());
    }
}
