use std::time::Duration;

use ctxbridge::{define_proxy, is_proxy, LoopbackAdapter, Options, Target, Value};

#[tokio::test]
async fn root_reexports_cover_a_full_call() {
    let (provide, inject) = define_proxy(
        |_| {
            Target::builder()
                .sync_method("greet", |args| {
                    let name = args.first().and_then(Value::as_str).unwrap_or("world");
                    Ok(Value::from(format!("hello, {name}")))
                })
                .build()
        },
        Options::default()
            .with_namespace("facade")
            .with_heartbeat_interval(Duration::from_millis(20))
            .with_heartbeat_timeout(Duration::from_millis(500)),
    )
    .expect("options should be valid");

    let (provider_side, injector_side) = LoopbackAdapter::pair();
    provide
        .provide(provider_side, Vec::new())
        .await
        .expect("provide should bind");
    let handle = inject.inject(injector_side);
    assert!(is_proxy(&handle));

    let greeting: String = handle
        .member("greet")
        .call_as(vec![Value::from("bridge")])
        .await
        .expect("call should succeed");
    assert_eq!(greeting, "hello, bridge");
}

#[test]
fn module_reexports_are_reachable() {
    assert_eq!(ctxbridge::proxy::DEFAULT_NAMESPACE, "__comctx__");
    assert!(!ctxbridge::check_message(None));
    assert_eq!(ctxbridge::protocol::MessageType::Ping.as_str(), "ping");
}
