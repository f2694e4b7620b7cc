//! Own test binary: signal dispositions are process-global.
#![cfg(unix)]

mod common;

use std::sync::Arc;

use common::{RecordingProcess, ScriptedBroker, wait_until};

use broker_bridge::{BridgeContext, ConsumerConfig, InstanceOptions, ShutdownCoordinator};
use nix::sys::signal::{Signal, raise};

#[tokio::test]
async fn termination_signal_drains_then_reraises() {
    let process = RecordingProcess::new();
    let ctx = Arc::new(BridgeContext::new(process.clone()));
    let hooks = ShutdownCoordinator::new(ctx.clone())
        .with_panic_hook(false)
        .install()
        .unwrap();
    let broker = ScriptedBroker::new();
    let instance = ctx
        .get_instance(
            InstanceOptions::new("h:1", "svc")
                .with_consumer(ConsumerConfig::new("svc-in", vec!["in".into()]))
                .with_client(broker.client()),
        )
        .unwrap();
    wait_until(|| broker.run_entered()).await;

    raise(Signal::SIGTERM).unwrap();

    assert_eq!(process.wait_raise().await, Signal::SIGTERM as i32);
    assert!(process.exits().is_empty());
    assert_eq!(
        broker.script.consumer_disconnects.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(instance.consumer().unwrap().subject().is_closed());
    hooks.join().await;
}
