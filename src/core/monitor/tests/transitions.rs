use std::time::Duration;

use crate::core::finesse::AgentState;
use crate::core::monitor::test_support::*;
use crate::core::monitor::{ConnectionState, GENERIC_REASON_CODE, Phase};
use crate::core::notify::NotificationKind;

#[tokio::test(start_paused = true)]
async fn generic_not_ready_notifies_once_across_identical_polls() {
    let h = Harness::logged_in(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE))).await;
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::NotReady]);

    tokio::time::sleep(minutes(12)).await;
    drain().await;

    assert!(h.api.connect_calls() > 10);
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::NotReady]);
    assert_eq!(h.detector.focus_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn not_ready_observed_by_realtime_tick_alerts_and_focuses() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    assert!(h.notifier.calls().is_empty());

    h.api
        .respond_with(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE)));
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;

    let calls = h.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, NotificationKind::NotReady);
    assert!(calls[0].message.contains("Jane Doe"));
    assert_eq!(h.detector.focus_calls(), 1);

    let status = h.monitor.status();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(
        status.agent.map(|a| a.state),
        Some(AgentState::NotReady)
    );
}

#[tokio::test(start_paused = true)]
async fn missing_reason_code_is_treated_like_the_sentinel() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.api.respond_with(agent(AgentState::NotReady, None));
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::NotReady]);
}

#[tokio::test(start_paused = true)]
async fn returning_to_not_ready_after_ready_alerts_again() {
    let h = Harness::logged_in(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE))).await;

    h.api.respond_with(agent(AgentState::Ready, None));
    tokio::time::sleep(Duration::from_secs(61)).await;
    h.api
        .respond_with(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE)));
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;

    assert_eq!(
        h.notifier.kinds(),
        vec![NotificationKind::NotReady, NotificationKind::NotReady]
    );
}

#[tokio::test(start_paused = true)]
async fn outside_working_hours_suppresses_alerts_and_polling() {
    let h = Harness::at(
        monday(19, 0),
        Reply::Status(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE))),
    )
    .await;
    h.monitor.login(credentials()).await.unwrap();
    assert!(h.notifier.calls().is_empty());
    assert_eq!(h.api.connect_calls(), 1);

    tokio::time::sleep(minutes(10)).await;
    drain().await;

    assert_eq!(h.api.connect_calls(), 1);
    let status = h.monitor.status();
    assert_eq!(status.connection, ConnectionState::MonitoringPaused);
    assert!(status.message.unwrap().contains("Tue 08:00"));
}

#[tokio::test(start_paused = true)]
async fn closed_client_stops_remote_calls() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.monitor.start().await.unwrap();
    let before = h.api.connect_calls();

    h.detector.set_open(false);
    tokio::time::sleep(minutes(6)).await;
    drain().await;
    assert_eq!(h.api.connect_calls(), before);
    assert_eq!(h.monitor.status().connection, ConnectionState::MonitoringPaused);

    h.detector.set_open(true);
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert!(h.api.connect_calls() > before);
}

#[tokio::test(start_paused = true)]
async fn device_error_fires_once_per_outage() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;

    h.api.reply_with(Reply::Timeout);
    tokio::time::sleep(minutes(5)).await;
    drain().await;
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::DeviceError]);
    assert_eq!(h.monitor.status().connection, ConnectionState::Error);

    h.api.respond_with(agent(AgentState::Ready, None));
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(h.monitor.status().connection, ConnectionState::Connected);

    h.api.reply_with(Reply::Timeout);
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(
        h.notifier.kinds(),
        vec![NotificationKind::DeviceError, NotificationKind::DeviceError]
    );
}

#[tokio::test(start_paused = true)]
async fn state_change_is_confirmed_by_a_settle_poll() {
    let h = Harness::logged_in(agent(AgentState::NotReady, Some(2))).await;
    let before = h.api.connect_calls();

    h.monitor
        .change_agent_state(AgentState::Ready, None)
        .await
        .unwrap();
    assert!(h.monitor.armed_timers().contains(&"settle"));
    assert_eq!(h.api.state_changes(), vec![(AgentState::Ready, None)]);
    // Not optimistic: the published view still shows the pause.
    assert_eq!(
        h.monitor.status().agent.map(|a| a.state),
        Some(AgentState::NotReady)
    );

    tokio::time::sleep(Duration::from_millis(3_100)).await;
    drain().await;

    assert_eq!(h.api.connect_calls(), before + 1);
    let status = h.monitor.status();
    assert_eq!(status.agent.map(|a| a.state), Some(AgentState::Ready));
    assert_eq!(status.phase, Phase::Polling);
}

#[tokio::test(start_paused = true)]
async fn commands_require_a_session() {
    let h = Harness::new(Reply::Status(agent(AgentState::Ready, None))).await;
    let err = h
        .monitor
        .change_agent_state(AgentState::Ready, None)
        .await
        .unwrap_err();
    assert!(matches!(err, crate::core::error::WatchError::NotLoggedIn));
    assert!(h.monitor.reason_codes().await.is_err());
    assert_eq!(h.api.connect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn tick_during_an_inflight_poll_is_skipped() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.api.respond_with(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE)));
    h.api.hold();

    let monitor = h.monitor.clone();
    let inflight = tokio::spawn(async move { monitor.poll_now().await });
    drain().await;
    assert_eq!(h.api.connect_calls(), 2);

    // The realtime tick lands while the manual poll is still waiting.
    tokio::time::sleep(Duration::from_secs(61)).await;
    drain().await;
    assert_eq!(h.api.connect_calls(), 2);
    assert!(h.notifier.calls().is_empty());

    h.api.release();
    let status = inflight.await.unwrap().unwrap();
    assert_eq!(status.map(|s| s.state), Some(AgentState::NotReady));
    drain().await;
    assert_eq!(h.api.connect_calls(), 2);
    assert_eq!(h.notifier.kinds(), vec![NotificationKind::NotReady]);
}

#[tokio::test(start_paused = true)]
async fn poll_outlived_by_logout_is_discarded() {
    let h = Harness::logged_in(agent(AgentState::Ready, None)).await;
    h.api.respond_with(agent(AgentState::NotReady, Some(GENERIC_REASON_CODE)));
    h.api.hold();

    let monitor = h.monitor.clone();
    let inflight = tokio::spawn(async move { monitor.poll_now().await });
    drain().await;
    h.monitor.logout().await.unwrap();

    h.api.release();
    assert!(inflight.await.unwrap().unwrap().is_none());
    drain().await;
    assert!(h.notifier.calls().is_empty());
    assert_eq!(h.detector.focus_calls(), 0);
    assert_eq!(h.monitor.status().phase, Phase::Idle);
    assert!(h.store.load_agent_status().await.unwrap().is_none());
}
