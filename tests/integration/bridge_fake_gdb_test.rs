//! Bridge tests against a real subprocess (a shell script speaking MI), so
//! spawn, pipe wiring, and teardown are exercised for real.

use assert_matches::assert_matches;
use gdb_bridge::error::CommandError;
use gdb_bridge::mi::{GdbBridge, MiRecord, ResultClass};
use gdb_bridge::monitor::EventMonitor;
use gdb_bridge::session::SessionState;
use gdb_bridge::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

fn fake_gdb() -> String {
    format!("{}/tests/fixtures/fake_gdb.sh", env!("CARGO_MANIFEST_DIR"))
}

#[tokio::test]
async fn test_spawn_and_correlate_over_real_pipes() {
    let bridge = GdbBridge::start(&fake_gdb(), &[], Duration::from_secs(5))
        .await
        .unwrap();

    let response = bridge.command("-gdb-version").await.unwrap();
    assert_eq!(response.class, ResultClass::Done);
    assert_eq!(response.results.str_field("version"), Some("13.2"));

    bridge.stop().await;
    assert!(bridge.has_exited());
}

#[tokio::test]
async fn test_sequential_commands_each_get_their_own_reply() {
    let bridge = GdbBridge::start(&fake_gdb(), &[], Duration::from_secs(5))
        .await
        .unwrap();

    for _ in 0..5 {
        let response = bridge.command("-exec-next").await.unwrap();
        assert_eq!(response.class, ResultClass::Done);
    }
    bridge.stop().await;
}

#[tokio::test]
async fn test_silent_subprocess_times_out_then_goes_unhealthy() {
    let bridge = GdbBridge::start(
        &fake_gdb(),
        &["--silent-mode".to_string()],
        Duration::from_millis(100),
    )
    .await
    .unwrap();

    let err = bridge.command("-gdb-version").await.unwrap_err();
    assert_matches!(err, Error::Command(CommandError::Timeout(_)));
    assert!(bridge.is_healthy());

    let err = bridge.command("-gdb-version").await.unwrap_err();
    assert_matches!(err, Error::Command(CommandError::Timeout(_)));
    assert!(!bridge.is_healthy());

    bridge.stop().await;
}

#[tokio::test]
async fn test_subprocess_death_ends_event_stream_with_sentinel() {
    let bridge = GdbBridge::start(
        &fake_gdb(),
        &["--die-after-first".to_string()],
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let mut events = bridge.event_stream().unwrap();

    // The script exits on the first command; the in-flight await must fail
    // rather than hang.
    let err = bridge.command("-exec-run").await.unwrap_err();
    assert_matches!(err, Error::Command(CommandError::ProcessExited));

    assert_matches!(events.recv().await.unwrap(), MiRecord::Sentinel);
    assert!(bridge.has_exited());

    bridge.stop().await;
}

#[tokio::test]
async fn test_stop_mid_command_fails_the_inflight_wait() {
    let bridge = Arc::new(
        GdbBridge::start(
            &fake_gdb(),
            &["--silent-mode".to_string()],
            Duration::from_secs(30),
        )
        .await
        .unwrap(),
    );

    let inflight = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.command("-exec-run").await })
    };
    // Let the command reach the wire before tearing down underneath it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    bridge.stop().await;

    // The pending wait resolves with an error, well inside its 30s timeout.
    let err = inflight.await.unwrap().unwrap_err();
    assert_matches!(err, Error::Command(CommandError::ProcessExited));
    assert!(bridge.has_exited());
}

#[tokio::test]
async fn test_teardown_mid_enrichment_reaps_child() {
    // The fixture reports a SIGSEGV immediately and then never answers, so
    // the monitor's enrichment commands are in flight when teardown starts.
    let bridge = Arc::new(
        GdbBridge::start(
            &fake_gdb(),
            &["--crash-then-hang".to_string()],
            Duration::from_secs(30),
        )
        .await
        .unwrap(),
    );
    let records = bridge.event_stream().unwrap();
    let state = Arc::new(RwLock::new(SessionState::Connected));
    let (events, _keepalive) = broadcast::channel(16);
    let monitor = EventMonitor::spawn(
        bridge.clone(),
        records,
        state,
        events,
        None,
        Duration::from_secs(1),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Teardown order mirrors session disconnect: monitor first, then bridge.
    monitor.abort();
    bridge.stop().await;
    assert!(bridge.has_exited());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let bridge = GdbBridge::start(&fake_gdb(), &[], Duration::from_secs(5))
        .await
        .unwrap();
    bridge.stop().await;
    bridge.stop().await;
    assert!(bridge.has_exited());
}

#[tokio::test]
async fn test_spawn_missing_binary_fails_cleanly() {
    let err = GdbBridge::start("/no/such/gdb-binary", &[], Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Start(_));
}
