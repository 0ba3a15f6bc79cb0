//! End-to-end session lifecycle against the scripted gdb subprocess.

use assert_matches::assert_matches;
use gdb_bridge::error::{ConnectError, DispatchError};
use gdb_bridge::monitor::SessionEvent;
use gdb_bridge::session::{SessionConfig, SessionManager, SessionState};
use gdb_bridge::Error;
use std::time::Duration;

fn config() -> SessionConfig {
    SessionConfig {
        gdb_path: format!("{}/tests/fixtures/fake_gdb.sh", env!("CARGO_MANIFEST_DIR")),
        command_timeout: Duration::from_secs(5),
        analysis_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn test_full_lifecycle_connect_dispatch_disconnect() {
    let manager = SessionManager::new(config(), None);
    let session = manager.create_session().await;
    let mut events = session.subscribe();

    session.connect("localhost:1234", true).await.unwrap();
    assert_eq!(session.state().await, SessionState::Connected);
    assert_matches!(events.recv().await.unwrap(), SessionEvent::Started);

    // Every typed operation goes through the live subprocess.
    session.exec_continue().await.unwrap();
    session.step_over().await.unwrap();
    let output = session.execute_cli("info threads").await.unwrap();
    assert_eq!(output, "");

    manager.destroy_session(&session.id).await;
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(manager.get_session(&session.id).await.is_err());
}

#[tokio::test]
async fn test_connect_failure_leaves_session_failed() {
    let manager = SessionManager::new(
        SessionConfig {
            gdb_path: "/no/such/gdb".to_string(),
            ..config()
        },
        None,
    );
    let session = manager.create_session().await;

    let err = session.connect("localhost:1234", true).await.unwrap_err();
    assert_matches!(err, Error::Start(_));
    assert_matches!(session.state().await, SessionState::Failed { .. });

    // Failed sessions refuse dispatch but can still be destroyed.
    let err = session.backtrace().await.unwrap_err();
    assert_matches!(err, Error::Dispatch(DispatchError::NotConnected));
    manager.destroy_session(&session.id).await;
}

#[tokio::test]
async fn test_second_connect_rejected_instead_of_stacking_subprocesses() {
    let manager = SessionManager::new(config(), None);
    let session = manager.create_session().await;
    session.connect("localhost:1234", true).await.unwrap();

    // A session holds one subprocess for its lifetime; a second connect must
    // not replace (and orphan) the first.
    let err = session.connect("localhost:5678", true).await.unwrap_err();
    assert_matches!(err, Error::Connect(ConnectError::AlreadyStarted));
    assert_eq!(session.state().await, SessionState::Connected);

    // The surviving conversation is the original one and teardown reaps it.
    session.exec_continue().await.unwrap();
    manager.destroy_session(&session.id).await;
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_two_sessions_run_independent_subprocesses() {
    let manager = SessionManager::new(config(), None);
    let a = manager.create_session().await;
    let b = manager.create_session().await;

    a.connect("localhost:1111", false).await.unwrap();
    b.connect("localhost:2222", false).await.unwrap();

    // Tearing one down leaves the other's conversation intact.
    manager.destroy_session(&a.id).await;
    b.exec_continue().await.unwrap();
    manager.destroy_session(&b.id).await;
}

#[tokio::test]
async fn test_park_and_resume_preserves_live_session() {
    let manager = SessionManager::new(config(), None);
    let session = manager.create_session().await;
    session.connect("localhost:1234", false).await.unwrap();

    manager
        .park_session(&session.id, Duration::from_secs(30))
        .await;
    let resumed = manager.resume_session(&session.id).await.unwrap();
    assert_eq!(resumed.id, session.id);

    // The debugger conversation survived the park.
    resumed.exec_continue().await.unwrap();
    manager.destroy_session(&session.id).await;
}
