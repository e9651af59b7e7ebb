//! End-to-end runs of the pump and both promise bridges.

use ferry_script::rquickjs::{Ctx, IntoJs};
use ferry_script::{
    host_future, HostError, HostFunction, HostValue, ScriptRuntime, WorkItem,
};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

fn script_runtime() -> ScriptRuntime {
    ScriptRuntime::new(Handle::current()).unwrap()
}

fn delayed(ms: u64, outcome: Result<&'static str, &'static str>) -> HostFunction {
    HostFunction::asynchronous(move |_ctx, _args| {
        Ok(host_future(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            outcome
                .map(HostValue::from)
                .map_err(HostError::failed)
        }))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolved_promise_reaches_host() {
    let script = script_runtime();
    let promise = script.execute("Promise.resolve(5)").unwrap();
    let completion = script.to_future(&promise).unwrap();

    script.pump().await.unwrap();

    let value = completion.await.unwrap();
    assert_eq!(script.to_host(&value).unwrap(), HostValue::Number(5.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejection_reason_is_kept_verbatim() {
    let script = script_runtime();
    let promise = script.execute("Promise.reject('nope')").unwrap();
    let completion = script.to_future(&promise).unwrap();

    script.pump().await.unwrap();

    let rejection = completion.await.unwrap_err();
    assert_eq!(rejection.message(), "nope");
    let reason = rejection.reason().unwrap();
    assert_eq!(script.to_host(reason).unwrap(), HostValue::from("nope"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_function_error_becomes_rejection() {
    let script = script_runtime();
    let promise = script
        .execute("(async () => { throw new Error('bad things'); })()")
        .unwrap();
    let completion = script.to_future(&promise).unwrap();

    script.pump().await.unwrap();

    assert_eq!(completion.await.unwrap_err().message(), "bad things");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_first_settlement_counts() {
    let script = script_runtime();
    let thenable = script
        .execute("({ then(res, rej) { res(1); res(2); rej('late'); } })")
        .unwrap();

    let mut completion = script.to_future(&thenable).unwrap();
    let value = completion.try_settled().unwrap().unwrap();
    assert_eq!(script.to_host(&value).unwrap(), HostValue::Number(1.0));
    assert_eq!(script.scheduler().pending_observers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_values_are_not_promises() {
    let script = script_runtime();
    let value = script.execute("({ then: 3 })").unwrap();
    assert!(!script.is_thenable(&value));
    assert!(script.to_future(&value).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delayed_host_operations_settle_through_the_pump() {
    let script = script_runtime();
    script
        .define_host_callback("host", "succeed", delayed(200, Ok("ok")))
        .unwrap();
    script
        .define_host_callback("host", "fail", delayed(200, Err("boom")))
        .unwrap();

    let promise = script
        .execute(
            "Promise.all([
                host.succeed(),
                host.fail().catch(e => e instanceof Error ? e.message : 'not an error'),
            ]).then(parts => parts.join(','))",
        )
        .unwrap();
    let completion = script.to_future(&promise).unwrap();
    assert_eq!(script.queue().outstanding(), 2);

    let started = Instant::now();
    let stats = script.pump().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(stats.failures, 0);
    assert_eq!(script.queue().outstanding(), 0);
    assert_eq!(script.scheduler().pending_operations(), 0);

    let value = completion.await.unwrap();
    assert_eq!(script.display(&value).unwrap(), "ok,boom");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_host_operation_bridges_back_to_the_host() {
    let script = script_runtime();
    script
        .define_host_callback("host", "succeed", delayed(200, Ok("ok")))
        .unwrap();
    script
        .define_host_callback("host", "fail", delayed(200, Err("boom")))
        .unwrap();

    let first = script.execute("host.succeed()").unwrap();
    let second = script.execute("host.fail()").unwrap();
    let first = script.to_future(&first).unwrap();
    let second = script.to_future(&second).unwrap();

    script.pump().await.unwrap();

    let value = first.await.unwrap();
    assert_eq!(script.display(&value).unwrap(), "ok");

    let rejection = second.await.unwrap_err();
    assert_eq!(rejection.message(), "boom");
    let reason = rejection.reason().unwrap();
    assert_eq!(script.display(reason).unwrap(), "Error: boom");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn symbol_rejection_is_described() {
    let script = script_runtime();
    let promise = script.execute("Promise.reject(Symbol('s'))").unwrap();
    let completion = script.to_future(&promise).unwrap();

    script.pump().await.unwrap();

    assert_eq!(completion.await.unwrap_err().message(), "Symbol(s)");
    let after = script.execute("throw new Error('next')").unwrap_err();
    assert!(after.to_string().contains("next"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chained_reactions_wait_for_the_pump() {
    let script = script_runtime();
    let promise = script
        .execute("Promise.resolve(1).then(x => x + 1).then(x => x * 10)")
        .unwrap();
    let mut completion = script.to_future(&promise).unwrap();
    assert!(completion.try_settled().is_none());

    let stats = script.pump().await.unwrap();
    assert!(stats.engine_jobs >= 2);

    let value = completion.await.unwrap();
    assert_eq!(script.to_host(&value).unwrap(), HostValue::Number(20.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_without_message_uses_fallback() {
    let script = script_runtime();
    script
        .define_host_callback(
            "host",
            "vague",
            HostFunction::asynchronous(|_ctx, _args| {
                Ok(host_future(async { Err(HostError::failed("")) }))
            }),
        )
        .unwrap();

    let promise = script
        .execute("host.vague().catch(e => e.message)")
        .unwrap();
    let completion = script.to_future(&promise).unwrap();
    script.pump().await.unwrap();

    let value = completion.await.unwrap();
    assert_eq!(
        script.display(&value).unwrap(),
        "Unknown error in host operation."
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outstanding_work_keeps_the_pump_alive() {
    let script = script_runtime();
    let queue = script.queue().clone();
    queue.begin_operation();

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        queue.enqueue(WorkItem::completion(|ctx: &Ctx<'_>| {
            ctx.globals().set("arrived", true)
        }));
    });

    let stats = script.pump().await.unwrap();
    assert_eq!(stats.items_run, 1);

    let arrived = script.execute("arrived").unwrap();
    assert_eq!(script.to_host(&arrived).unwrap(), HostValue::Bool(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_and_async_callbacks_mix() {
    let script = script_runtime();
    script
        .define_host_callback(
            "host",
            "now",
            HostFunction::sync(|ctx, _args| "sync".into_js(ctx)),
        )
        .unwrap();
    script
        .define_host_callback("host", "later", delayed(10, Ok("async")))
        .unwrap();

    let promise = script
        .execute("host.later().then(v => host.now() + '+' + v)")
        .unwrap();
    let completion = script.to_future(&promise).unwrap();
    script.pump().await.unwrap();

    let value = completion.await.unwrap();
    assert_eq!(script.display(&value).unwrap(), "sync+async");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_runtime_releases_callbacks() {
    let script = script_runtime();
    script
        .define_host_callback("host", "noop", delayed(1, Ok("")))
        .unwrap();
    let extra = script.callbacks().register("extra", delayed(1, Ok("")));
    assert_eq!(script.callbacks().len(), 2);

    drop(script);
    assert!(extra.upgrade().is_none());
}
