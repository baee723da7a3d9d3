//! Integration tests for the reconnect supervisor.
//!
//! The mock severs the live connection from the server side; the adapter
//! must redial, replay the stored credentials, and keep the first event
//! stream alive, or turn fatal when the retry budget runs out.

use std::sync::Arc;
use std::time::Duration;

use ami_link::ami::{Adapter, LinkState, Record};
use ami_link::AppError;

use super::test_helpers::{wait_until, MockManager};

const STEP: Duration = Duration::from_secs(5);

async fn wait_connected(adapter: &Adapter) {
    let mut state_rx = adapter.subscribe_state();
    tokio::time::timeout(STEP, state_rx.wait_for(|s| *s == LinkState::Connected))
        .await
        .expect("connected within timeout")
        .expect("state channel open");
}

/// After a sever the adapter re-authenticates and the old stream keeps going.
#[tokio::test]
async fn severed_link_is_restored_with_credentials_and_same_stream() {
    let mock = MockManager::start().await;
    let adapter = Adapter::connect(mock.config()).await.expect("connect");
    let mut events = adapter.login("admin", "pw").await.expect("login");

    mock.sever().await;

    assert!(
        wait_until(STEP, || mock.logins().len() == 2).await,
        "adapter must log in again after reconnect"
    );
    assert_eq!(mock.logins(), vec!["admin".to_owned(), "admin".to_owned()]);
    assert_eq!(mock.connections(), 2);
    wait_connected(&adapter).await;

    let event = Record::new().with("Event", "Reload").with("Module", "all");
    mock.push_event(&event).await;
    let received = tokio::time::timeout(STEP, events.next_event())
        .await
        .expect("event within timeout")
        .expect("stream still open");
    assert_eq!(received, event);

    let pong = adapter.ping().await.expect("ping after reconnect");
    assert_eq!(pong.get("Ping"), Some("Pong"));
}

/// Without a prior login there is nothing to replay, but the link returns.
#[tokio::test]
async fn reconnect_without_login_skips_relogin() {
    let mock = MockManager::start().await;
    let adapter = Adapter::connect(mock.config()).await.expect("connect");

    mock.sever().await;
    assert!(wait_until(STEP, || mock.connections() == 2).await);
    wait_connected(&adapter).await;

    let pong = adapter.ping().await.expect("ping after reconnect");
    assert_eq!(pong.get("Ping"), Some("Pong"));
    assert!(mock.logins().is_empty());
}

/// A call waiting for its reply when the link drops fails instead of hanging.
#[tokio::test]
async fn in_flight_exec_fails_with_connection_lost() {
    let mock = MockManager::start().await;
    mock.silence("Hang");
    let mut config = mock.config();
    config.timeouts.exec_seconds = 30;
    let adapter = Arc::new(Adapter::connect(config).await.expect("connect"));
    adapter.login("admin", "pw").await.expect("login");

    let pending = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.exec(Record::action("Hang")).await })
    };

    assert!(
        wait_until(STEP, || mock
            .actions()
            .iter()
            .any(|a| a.action_name() == Some("Hang")))
        .await
    );
    mock.sever().await;

    let result = tokio::time::timeout(STEP, pending)
        .await
        .expect("exec resolves within timeout")
        .expect("join");
    assert!(
        matches!(result, Err(AppError::ConnectionLost(_))),
        "got: {result:?}"
    );

    assert!(wait_until(STEP, || mock.logins().len() == 2).await);
    wait_connected(&adapter).await;
    adapter.ping().await.expect("usable after reconnect");
}

/// Running out of attempts is terminal, reported, and ends the stream.
#[tokio::test]
async fn exhausted_retry_budget_turns_fatal() {
    let mut mock = MockManager::start().await;
    let mut config = mock.config();
    config.reconnect.max_attempts = 2;
    let adapter = Adapter::connect(config).await.expect("connect");
    let mut events = adapter.login("admin", "pw").await.expect("login");

    mock.stop_accepting().await;
    mock.sever().await;

    let terminal = tokio::time::timeout(STEP, adapter.wait_terminal())
        .await
        .expect("terminal within timeout");
    assert!(
        matches!(terminal, AppError::ReconnectExhausted(_)),
        "got: {terminal:?}"
    );
    assert!(matches!(adapter.state(), LinkState::Fatal(AppError::ReconnectExhausted(_))));

    let end = tokio::time::timeout(STEP, events.next_event())
        .await
        .expect("stream ends within timeout");
    assert!(end.is_none());

    let result = adapter.ping().await;
    assert!(
        matches!(result, Err(AppError::ReconnectExhausted(_))),
        "got: {result:?}"
    );
    assert!(wait_until(STEP, || adapter.is_finished()).await);
}

/// A re-login the server rejects is terminal.
#[tokio::test]
async fn rejected_relogin_turns_fatal() {
    let mock = MockManager::start().await;
    let adapter = Adapter::connect(mock.config()).await.expect("connect");
    let _events = adapter.login("admin", "pw").await.expect("login");

    mock.reject_logins();
    mock.sever().await;

    let terminal = tokio::time::timeout(STEP, adapter.wait_terminal())
        .await
        .expect("terminal within timeout");
    match terminal {
        AppError::Auth(message) => assert_eq!(message, "Authentication failed"),
        other => panic!("expected AppError::Auth, got: {other:?}"),
    }
}

/// State transitions are observable: Connected, Reconnecting, Connected.
#[tokio::test]
async fn state_watch_reports_reconnect_cycle() {
    let mock = MockManager::start().await;
    let mut config = mock.config();
    config.reconnect.delay_seconds = 1;
    let adapter = Adapter::connect(config).await.expect("connect");
    adapter.login("admin", "pw").await.expect("login");
    assert_eq!(adapter.state(), LinkState::Connected);

    let mut state_rx = adapter.subscribe_state();
    mock.sever().await;

    tokio::time::timeout(
        STEP,
        state_rx.wait_for(|s| matches!(s, LinkState::Reconnecting { .. })),
    )
    .await
    .expect("reconnecting within timeout")
    .expect("state channel open");

    wait_connected(&adapter).await;
    assert!(wait_until(STEP, || mock.logins().len() == 2).await);
}

/// A re-login the server never answers is terminal with the timeout.
#[tokio::test]
async fn unanswered_relogin_turns_fatal_with_timeout() {
    let mock = MockManager::start().await;
    let mut config = mock.config();
    config.timeouts.exec_seconds = 1;
    let adapter = Adapter::connect(config).await.expect("connect");
    let mut events = adapter.login("admin", "pw").await.expect("login");

    mock.silence("Login");
    mock.sever().await;

    let terminal = tokio::time::timeout(STEP, adapter.wait_terminal())
        .await
        .expect("terminal within timeout");
    assert!(matches!(terminal, AppError::Timeout(_)), "got: {terminal:?}");
    assert!(matches!(adapter.state(), LinkState::Fatal(AppError::Timeout(_))));
    assert_eq!(mock.login_attempts(), 2);

    let end = tokio::time::timeout(STEP, events.next_event())
        .await
        .expect("stream ends within timeout");
    assert!(end.is_none());
}

/// Losing the link while re-login is pending spends that attempt and the
/// next dial succeeds.
#[tokio::test]
async fn link_lost_during_relogin_retries_next_attempt() {
    let mock = MockManager::start().await;
    let adapter = Adapter::connect(mock.config()).await.expect("connect");
    let mut events = adapter.login("admin", "pw").await.expect("login");

    mock.silence("Login");
    mock.sever().await;
    assert!(
        wait_until(STEP, || mock.login_attempts() == 2).await,
        "re-login must reach the second connection"
    );

    mock.unsilence("Login");
    mock.sever().await;

    assert!(
        wait_until(STEP, || mock.logins().len() == 2).await,
        "third connection must be authenticated"
    );
    wait_connected(&adapter).await;
    assert_eq!(mock.connections(), 3);
    assert_eq!(mock.login_attempts(), 3);

    let event = Record::new().with("Event", "Reload");
    mock.push_event(&event).await;
    let received = tokio::time::timeout(STEP, events.next_event())
        .await
        .expect("event within timeout")
        .expect("stream still open");
    assert_eq!(received, event);
    adapter.ping().await.expect("ping after retry");
}

/// A login cut off by a link drop leaves no unconfirmed identity behind:
/// the reconnect does not replay it, and a later login still succeeds.
#[tokio::test]
async fn login_cut_off_by_link_drop_is_not_replayed() {
    let mock = MockManager::start().await;
    mock.silence("Login");
    let mut config = mock.config();
    config.reconnect.delay_seconds = 1;
    let adapter = Arc::new(Adapter::connect(config).await.expect("connect"));

    let pending = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.login("admin", "pw").await })
    };
    assert!(wait_until(STEP, || mock.login_attempts() == 1).await);
    mock.sever().await;

    let result = tokio::time::timeout(STEP, pending)
        .await
        .expect("login resolves within timeout")
        .expect("join");
    assert!(
        matches!(result, Err(AppError::ConnectionLost(_))),
        "got: {result:?}"
    );

    assert!(wait_until(STEP, || mock.connections() == 2).await);
    wait_connected(&adapter).await;
    adapter.ping().await.expect("ping after reconnect");
    assert_eq!(mock.login_attempts(), 1, "restored state has nothing to replay");

    mock.unsilence("Login");
    let events = adapter.login("admin", "pw").await;
    assert!(events.is_ok(), "stream still available: {events:?}");
    assert_eq!(mock.logins(), vec!["admin".to_owned()]);
}
