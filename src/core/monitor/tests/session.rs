use std::time::Duration;

use crate::core::clock::Clock;
use crate::core::error::WatchError;
use crate::core::finesse::{AgentState, AgentStatus, Credentials};
use crate::core::monitor::test_support::*;
use crate::core::monitor::{ConnectionState, GENERIC_REASON_CODE, Phase};
use crate::core::notify::NotificationKind;
use crate::core::store::LockoutPolicy;

fn policy() -> LockoutPolicy {
    LockoutPolicy {
        max_attempts: 5,
        lockout_ms: 15 * 60_000,
    }
}

#[tokio::test(start_paused = true)]
async fn login_persists_session_and_starts_polling() {
    let h = Harness::new(Reply::Status(agent(AgentState::Ready, None))).await;
    let status = h.monitor.login(credentials()).await.unwrap();
    assert_eq!(status.display_name(), "Jane Doe");

    let stored = h
        .store
        .load_credentials(0, u64::MAX)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.credentials.username, "jane.doe@example.com");
    assert_eq!(h.monitor.armed_timers(), vec!["realtime", "standard"]);

    let published = h.monitor.status();
    assert_eq!(published.phase, Phase::Polling);
    assert_eq!(published.connection, ConnectionState::Connected);
    assert_eq!(published.username.as_deref(), Some("jane.doe@example.com"));
    assert_eq!(
        h.store.load_agent_status().await.unwrap().map(|s| s.state),
        Some(AgentState::Ready)
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_credentials_fail_locally_and_are_not_counted() {
    let h = Harness::new(Reply::Status(agent(AgentState::Ready, None))).await;
    let bad = Credentials::new("jane.doe@elsewhere.org", "12.345.678", "s3cret!");
    let err = h.monitor.login(bad).await.unwrap_err();
    assert!(matches!(err, WatchError::Validation(_)));
    assert_eq!(h.api.connect_calls(), 0);
    assert_eq!(
        h.store
            .login_attempts("jane.doe@elsewhere.org")
            .await
            .unwrap()
            .count,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn five_failures_lock_the_account_until_the_window_passes() {
    let h = Harness::new(Reply::Unauthorized).await;

    for expected_remaining in [4, 3, 2, 1] {
        match h.monitor.login(credentials()).await {
            Err(WatchError::LoginFailed {
                reason,
                remaining_attempts,
            }) => {
                assert!(matches!(*reason, WatchError::Auth));
                assert_eq!(remaining_attempts, expected_remaining);
            }
            other => panic!("expected LoginFailed, got {:?}", other),
        }
    }
    let err = h.monitor.login(credentials()).await.unwrap_err();
    assert!(matches!(err, WatchError::AccountLocked { retry_after_secs: 900 }));
    assert!(
        h.store
            .is_account_locked("jane.doe@example.com", &policy(), h.clock.epoch_ms())
            .await
            .unwrap()
    );

    // Locked: no request reaches the server.
    h.api.respond_with(agent(AgentState::Ready, None));
    assert!(matches!(
        h.monitor.login(credentials()).await,
        Err(WatchError::AccountLocked { .. })
    ));
    assert_eq!(h.api.connect_calls(), 5);

    h.clock.jump(Duration::from_secs(15 * 60 + 1));
    h.monitor.login(credentials()).await.unwrap();
    assert_eq!(
        h.store
            .login_attempts("jane.doe@example.com")
            .await
            .unwrap()
            .count,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn response_without_agent_record_is_a_failed_login() {
    let h = Harness::new(Reply::Status(AgentStatus::new(AgentState::Ready))).await;
    match h.monitor.login(credentials()).await {
        Err(WatchError::LoginFailed { reason, .. }) => {
            assert!(matches!(*reason, WatchError::Protocol(_)))
        }
        other => panic!("expected LoginFailed, got {:?}", other),
    }
    assert!(h.store.load_credentials(0, u64::MAX).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn connectivity_failures_do_not_count_toward_lockout() {
    let h = Harness::new(Reply::Timeout).await;
    for _ in 0..6 {
        assert!(matches!(
            h.monitor.login(credentials()).await,
            Err(WatchError::Timeout)
        ));
    }
    assert_eq!(
        h.store
            .login_attempts("jane.doe@example.com")
            .await
            .unwrap()
            .count,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn logout_clears_everything_and_stops_polling() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.monitor.logout().await.unwrap();

    // Only the idle watch survives; it polls the store, not the server.
    assert_eq!(h.monitor.armed_timers(), vec!["realtime"]);
    assert!(h.store.load_credentials(0, u64::MAX).await.unwrap().is_none());
    assert!(h.store.load_agent_status().await.unwrap().is_none());
    assert_eq!(h.monitor.status().phase, Phase::Idle);

    let calls = h.api.connect_calls();
    tokio::time::sleep(Duration::from_secs(600)).await;
    drain().await;
    assert_eq!(h.api.connect_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_a_stored_session() {
    let first = Harness::logged_in(agent(AgentState::Ready, None)).await;
    first.monitor.shutdown().await;

    let second = Harness::with_store(
        first.clock.clone(),
        first.store.clone(),
        Reply::Status(agent(AgentState::Ready, None)),
    );
    let resumed = second.monitor.start().await.unwrap();
    assert_eq!(resumed.map(|s| s.state), Some(AgentState::Ready));
    assert_eq!(second.monitor.armed_timers(), vec!["realtime", "standard"]);
    assert_eq!(second.api.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_monitor_picks_up_a_login_made_elsewhere() {
    let daemon = Harness::new(Reply::Status(agent(AgentState::Ready, None))).await;
    assert!(daemon.monitor.start().await.unwrap().is_none());
    assert_eq!(daemon.monitor.armed_timers(), vec!["realtime"]);

    let cli = Harness::with_store(
        daemon.clock.clone(),
        daemon.store.clone(),
        Reply::Status(agent(AgentState::Ready, None)),
    );
    cli.monitor.login(credentials()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(daemon.monitor.status().phase, Phase::Polling);
    assert_eq!(daemon.monitor.armed_timers(), vec!["realtime", "standard"]);
}

#[tokio::test(start_paused = true)]
async fn expired_session_ends_on_the_next_tick() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.clock.jump(Duration::from_secs(481 * 60));

    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;

    let status = h.monitor.status();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.message.unwrap().contains("expired"));
    assert_eq!(h.api.connect_calls(), 1);
    assert!(h.store.load_credentials(0, u64::MAX).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn attach_restores_credentials_without_polling() {
    let first = Harness::logged_in(agent(AgentState::Ready, None)).await;
    let cli = Harness::with_store(
        first.clock.clone(),
        first.store.clone(),
        Reply::Status(agent(AgentState::Talking, None)),
    );
    let credentials = cli.monitor.attach().await.unwrap();
    assert_eq!(credentials.agent_id, "12.345.678");
    assert!(cli.monitor.armed_timers().is_empty());
    assert_eq!(cli.api.connect_calls(), 0);

    let status = cli.monitor.fetch_status().await.unwrap();
    assert_eq!(status.state, AgentState::Talking);
    assert!(cli.notifier.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn logout_keeps_watching_for_the_next_login() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.monitor.logout().await.unwrap();

    let cli = Harness::with_store(
        h.clock.clone(),
        h.store.clone(),
        Reply::Status(agent(AgentState::Ready, None)),
    );
    cli.monitor.login(credentials()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(h.monitor.status().phase, Phase::Polling);
    assert_eq!(h.monitor.armed_timers(), vec!["realtime", "standard"]);
}

#[tokio::test(start_paused = true)]
async fn state_alerted_at_login_is_not_alerted_again_by_the_daemon() {
    let not_ready = agent(AgentState::NotReady, Some(GENERIC_REASON_CODE));
    let daemon = Harness::new(Reply::Status(not_ready.clone())).await;
    assert!(daemon.monitor.start().await.unwrap().is_none());

    let cli = Harness::with_store(
        daemon.clock.clone(),
        daemon.store.clone(),
        Reply::Status(not_ready),
    );
    cli.monitor.login(credentials()).await.unwrap();
    assert_eq!(cli.notifier.kinds(), vec![NotificationKind::NotReady]);

    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(daemon.monitor.status().phase, Phase::Polling);
    assert!(daemon.api.connect_calls() >= 1);
    assert!(daemon.notifier.calls().is_empty());
    assert_eq!(daemon.detector.focus_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_does_not_repeat_an_alert_for_the_same_state() {
    let not_ready = agent(AgentState::NotReady, Some(GENERIC_REASON_CODE));
    let first = Harness::logged_in(not_ready.clone()).await;
    assert_eq!(first.notifier.kinds(), vec![NotificationKind::NotReady]);
    first.monitor.shutdown().await;

    let second = Harness::with_store(
        first.clock.clone(),
        first.store.clone(),
        Reply::Status(not_ready),
    );
    second.monitor.start().await.unwrap();
    tokio::time::sleep(minutes(3)).await;
    drain().await;
    assert!(second.notifier.calls().is_empty());
    assert_eq!(second.detector.focus_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_during_a_pause_arms_the_deadline_again() {
    let paused = agent(AgentState::NotReady, Some(2));
    let first = Harness::logged_in(paused.clone()).await;
    first.monitor.shutdown().await;

    let second = Harness::with_store(first.clock.clone(), first.store.clone(), Reply::Status(paused));
    second.monitor.start().await.unwrap();
    assert_eq!(second.monitor.status().phase, Phase::PauseArmed);
    assert_eq!(second.monitor.armed_timers(), vec!["pause"]);

    tokio::time::sleep(minutes(15) + Duration::from_secs(1)).await;
    drain().await;
    assert_eq!(
        second.notifier.kinds(),
        vec![NotificationKind::TimeExceeded { minutes: 15 }]
    );
}
