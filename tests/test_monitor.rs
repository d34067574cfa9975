//! Status monitor tests
//!
//! Status events are injected through the mock connection's feed and the
//! resulting flags and notifications are checked.


use nats_link::provider::NotificationKind;
use nats_link::transport::StatusKind;
use std::time::Duration;
use test_helpers::{Harness, WAIT};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_reconnecting_then_reconnect() {
    let harness = Harness::connected().await;
    let connection = harness.connection();
    harness.observer.clear();

    connection.push_status(StatusKind::Reconnecting);
    let reconnecting = timeout(WAIT, harness.manager.wait_for(|f| f.reconnecting))
        .await
        .expect("Monitor should apply reconnecting");
    assert!(!reconnecting.connected);
    assert!(!reconnecting.closed);

    connection.push_status(StatusKind::Reconnect);
    let reconnected = timeout(
        WAIT,
        harness.manager.wait_for(|f| f.connected && !f.reconnecting),
    )
    .await
    .expect("Monitor should apply reconnect");
    assert!(reconnected.is_consistent());

    harness.wait_for_notifications(2).await;
    assert_eq!(
        harness.observer.kinds(),
        vec![NotificationKind::Reconnecting, NotificationKind::Reconnect]
    );
}

#[tokio::test]
async fn test_disconnect_clears_connected_but_keeps_intent() {
    let harness = Harness::connected().await;
    harness.observer.clear();

    harness.connection().push_status(StatusKind::Disconnect);
    let flags = timeout(WAIT, harness.manager.wait_for(|f| !f.connected))
        .await
        .expect("Monitor should apply disconnect");

    assert!(!flags.closed);
    harness.wait_for_notifications(1).await;
    assert_eq!(harness.observer.kinds(), vec![NotificationKind::Disconnect]);
}

#[tokio::test]
async fn test_informational_events_do_not_notify() {
    let harness = Harness::connected().await;
    let connection = harness.connection();
    harness.observer.clear();

    connection.push_status(StatusKind::SlowConsumer);
    connection.push_status(StatusKind::LameDuck);
    connection.push_status(StatusKind::Other("pingTimer".to_string()));
    // Events are applied in order, so seeing the disconnect means the rest were processed
    connection.push_status(StatusKind::Disconnect);

    harness.wait_for_notifications(1).await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.observer.kinds(), vec![NotificationKind::Disconnect]);
}

#[tokio::test]
async fn test_events_after_close_are_ignored() {
    let harness = Harness::connected().await;
    let connection = harness.connection();

    harness.manager.close().await;
    let notifications = harness.observer.notifications().len();

    connection.push_status(StatusKind::Reconnect);
    sleep(Duration::from_millis(20)).await;

    assert!(harness.manager.is_closed());
    assert!(!harness.manager.is_connected());
    assert_eq!(harness.observer.notifications().len(), notifications);
}

#[tokio::test]
async fn test_monitor_follows_replacement_connection() {
    let harness = Harness::connected().await;
    harness.manager.reconnect().await;
    let current = harness.connection();
    harness.observer.clear();

    current.push_status(StatusKind::Disconnect);

    timeout(WAIT, harness.manager.wait_for(|f| !f.connected))
        .await
        .expect("Monitor for the new connection should apply disconnect");
    harness.wait_for_notifications(1).await;
    assert_eq!(harness.observer.kinds(), vec![NotificationKind::Disconnect]);
}
