//! Startup orchestration tests: timeouts, rollback-on-failure, and
//! parallel mode.

use std::sync::Arc;
use std::time::Duration;

use objectstack_kernel::kernel::{Kernel, KernelError, KernelOptions, LifecyclePhase};
use objectstack_kernel::types::KernelState;

use crate::common::{event_log, events, RecordingPlugin};

#[tokio::test]
async fn a_stalled_init_times_out_as_a_plugin_failure() {
    let log = event_log();
    let kernel = Kernel::new(KernelOptions {
        startup_timeout: Some(Duration::from_millis(50)),
        ..KernelOptions::default()
    });
    kernel
        .register(Arc::new(
            RecordingPlugin::new("stalled", &[], &log)
                .with_init_delay(Duration::from_millis(500)),
        ))
        .expect("register");

    let err = kernel.bootstrap().await.expect_err("must time out");
    assert!(matches!(
        err,
        KernelError::LifecycleTimeout {
            plugin,
            phase: LifecyclePhase::Init,
            ..
        } if plugin == "stalled"
    ));
    assert_eq!(kernel.state(), KernelState::Initializing);
}

#[tokio::test]
async fn rollback_on_failure_destroys_started_plugins_in_reverse_order() {
    let log = event_log();
    let kernel = Kernel::new(KernelOptions {
        rollback_on_failure: true,
        ..KernelOptions::default()
    });
    kernel
        .register(Arc::new(RecordingPlugin::new("db", &[], &log)))
        .expect("register");
    kernel
        .register(Arc::new(RecordingPlugin::new("cache", &["db"], &log)))
        .expect("register");
    kernel
        .register(Arc::new(
            RecordingPlugin::new("broken", &["cache"], &log).failing_init(),
        ))
        .expect("register");

    kernel.bootstrap().await.expect_err("must fail");

    assert_eq!(
        events(&log),
        ["init:db", "init:cache", "init:broken", "destroy:cache", "destroy:db"]
    );
}

#[tokio::test]
async fn without_rollback_nothing_is_destroyed_on_failure() {
    let log = event_log();
    let kernel = Kernel::new(KernelOptions::default());
    kernel
        .register(Arc::new(RecordingPlugin::new("db", &[], &log)))
        .expect("register");
    kernel
        .register(Arc::new(
            RecordingPlugin::new("broken", &["db"], &log).failing_init(),
        ))
        .expect("register");

    kernel.bootstrap().await.expect_err("must fail");

    assert_eq!(events(&log), ["init:db", "init:broken"]);
}

#[tokio::test]
async fn parallel_mode_still_respects_the_dependency_partial_order() {
    let log = event_log();
    let kernel = Kernel::new(KernelOptions {
        parallel: true,
        ..KernelOptions::default()
    });
    kernel
        .register(Arc::new(RecordingPlugin::new("base", &[], &log)))
        .expect("register");
    kernel
        .register(Arc::new(RecordingPlugin::new("mid", &["base"], &log)))
        .expect("register");
    kernel
        .register(Arc::new(RecordingPlugin::new("top", &["mid"], &log)))
        .expect("register");
    kernel
        .register(Arc::new(RecordingPlugin::new("loner", &[], &log)))
        .expect("register");

    kernel.bootstrap().await.expect("bootstrap");
    assert_eq!(kernel.state(), KernelState::Running);

    let log = events(&log);
    let pos = |needle: &str| {
        log.iter()
            .position(|e| e == needle)
            .unwrap_or_else(|| panic!("{needle} missing from {log:?}"))
    };
    assert!(pos("init:base") < pos("init:mid"));
    assert!(pos("init:mid") < pos("init:top"));
    // Every init happens before any start.
    assert!(log.iter().position(|e| e.starts_with("start:")).expect("starts ran")
        > pos("init:top"));
}

#[tokio::test]
async fn parallel_mode_fails_fast_per_stage() {
    let log = event_log();
    let kernel = Kernel::new(KernelOptions {
        parallel: true,
        rollback_on_failure: true,
        ..KernelOptions::default()
    });
    kernel
        .register(Arc::new(RecordingPlugin::new("ok", &[], &log)))
        .expect("register");
    kernel
        .register(Arc::new(
            RecordingPlugin::new("broken", &[], &log).failing_init(),
        ))
        .expect("register");
    kernel
        .register(Arc::new(RecordingPlugin::new("downstream", &["broken"], &log)))
        .expect("register");

    let err = kernel.bootstrap().await.expect_err("must fail");
    assert!(matches!(
        err,
        KernelError::Lifecycle { plugin, .. } if plugin == "broken"
    ));

    let log = events(&log);
    // The dependent stage never runs; the surviving plugin is rolled back.
    assert!(!log.contains(&"init:downstream".to_owned()));
    assert!(log.contains(&"destroy:ok".to_owned()));
}
