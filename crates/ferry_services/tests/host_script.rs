//! The installed host object driven by a script like the demo one.

use ferry_script::ScriptRuntime;
use ferry_services::{install, HostSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;

const SCRIPT: &str = r#"
(function () {
  host.echo("Hello world!");

  function resolved(result) { host.echo("Resolved: " + result); }
  function rejected(reason) { host.echo("Rejected: " + reason.message); }

  host.doSuccessfulWork().then(resolved, rejected);
  host.doUnsuccessfulWork().then(resolved, rejected);

  return 0;
})();
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn demo_work_is_reported_through_echo() {
    let output = Arc::new(Mutex::new(Vec::<u8>::new()));
    let settings = HostSettings {
        work_delay_ms: 20,
        ..HostSettings::default()
    };

    let script = ScriptRuntime::new(Handle::current()).unwrap();
    install(&script, &settings, output.clone()).unwrap();
    assert_eq!(script.callbacks().len(), 5);

    let result = script.execute(SCRIPT).unwrap();
    assert!(!script.is_thenable(&result));
    script.pump().await.unwrap();
    assert_eq!(script.display(&result).unwrap(), "0");

    let written = String::from_utf8(output.lock().clone()).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "Hello world!");
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&"Resolved: promise from native code"));
    assert!(lines.contains(&"Rejected: promise from native code"));
}
