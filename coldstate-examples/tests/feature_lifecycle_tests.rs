//! End-to-end feature tests: each example module driven through a full
//! cold lifecycle, including link changes without ghost states, teardown
//! that leaves stopped monitors unusable, and reinitialization with a fresh
//! activation cycle.

use coldstate::MonitorError;
use coldstate_examples::bluetooth::{DeviceEvent, DeviceLink, DisconnectReason, LinkHealth};
use coldstate_examples::network::{LinkKind, NetworkReachability, NetworkState};
use coldstate_examples::permissions::{
    PermissionAuthority, PermissionState, PermissionStatus, PermissionWatcher,
};
use std::time::Duration;

#[tokio::test]
async fn network_link_changes_flow_to_observers_without_ghost_states() {
    let network = NetworkReachability::new();
    let mut observer = network.subscribe().await.unwrap();
    assert!(matches!(network.current(), NetworkState::Initializing { .. }));

    let feed = network.link_feed().expect("cold-start installs a feed");
    feed.push(LinkKind::Wifi).unwrap();
    let state = observer
        .wait_for(|state| state.link() == Some(LinkKind::Wifi))
        .await
        .unwrap();
    assert!(state.is_available());
    let wifi_revision = observer.published().revision;

    feed.push(LinkKind::Cellular).unwrap();
    let published = observer.changed().await.unwrap();
    // The very next notification is the cellular report - no intermediate
    // state in between.
    assert_eq!(published.state.link(), Some(LinkKind::Cellular));
    assert_eq!(published.revision, wifi_revision.next());

    observer.unsubscribe().await.unwrap();
    assert!(matches!(network.current(), NetworkState::Deinitialized));
}

#[tokio::test]
async fn network_teardown_retires_the_monitor_and_reinit_mints_a_new_cycle() {
    let network = NetworkReachability::new();

    let mut observer = network.subscribe().await.unwrap();
    let first_feed = network.link_feed().unwrap();
    first_feed.push(LinkKind::Wifi).unwrap();
    let state = observer
        .wait_for(NetworkState::is_available)
        .await
        .unwrap();
    let first_activation = state.activation().unwrap();

    observer.unsubscribe().await.unwrap();
    assert!(matches!(network.current(), NetworkState::Deinitialized));
    // The stopped cycle's monitor no longer accepts reports.
    assert_eq!(
        first_feed.push(LinkKind::Offline),
        Err(MonitorError::ChannelClosed)
    );

    let mut observer = network.subscribe().await.unwrap();
    let second_activation = network.current().activation().unwrap();
    assert_ne!(first_activation, second_activation);

    let second_feed = network.link_feed().unwrap();
    second_feed.push(LinkKind::Cellular).unwrap();
    let state = observer
        .wait_for(|state| state.link() == Some(LinkKind::Cellular))
        .await
        .unwrap();
    assert_eq!(state.activation(), Some(second_activation));

    observer.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn network_observers_share_one_monitor() {
    let network = NetworkReachability::new();

    let mut first = network.subscribe().await.unwrap();
    let feed_before_second = network.link_feed().unwrap();
    let mut second = network.subscribe().await.unwrap();
    // The second subscriber did not replace the activation's feed.
    feed_before_second.push(LinkKind::Ethernet).unwrap();

    for observer in [&mut first, &mut second] {
        let state = observer
            .wait_for(|state| state.link() == Some(LinkKind::Ethernet))
            .await
            .unwrap();
        assert!(state.is_available());
    }

    second.unsubscribe().await.unwrap();
    assert!(network.current().is_available());

    first.unsubscribe().await.unwrap();
    assert!(matches!(network.current(), NetworkState::Deinitialized));
}

#[tokio::test]
async fn permission_denial_is_a_domain_state_not_an_error() {
    let authority = PermissionAuthority::new();
    let watcher =
        PermissionWatcher::with_poll_interval(authority.clone(), Duration::from_millis(1));

    let mut observer = watcher.subscribe().await.unwrap();
    let state = observer
        .wait_for(|state| state.status() == Some(PermissionStatus::NotDetermined))
        .await
        .unwrap();
    assert!(matches!(state, PermissionState::Known { .. }));

    authority.set(PermissionStatus::Denied);
    observer
        .wait_for(|state| state.status() == Some(PermissionStatus::Denied))
        .await
        .unwrap();

    authority.set(PermissionStatus::Granted);
    observer
        .wait_for(|state| state.status() == Some(PermissionStatus::Granted))
        .await
        .unwrap();

    observer.unsubscribe().await.unwrap();
    assert!(matches!(watcher.current(), PermissionState::Deinitialized));
}

#[tokio::test]
async fn device_link_loops_through_session_states() {
    let link = DeviceLink::new();
    let mut observer = link.subscribe().await.unwrap();
    let feed = link.device_feed().expect("cold-start installs a feed");

    feed.push(DeviceEvent::Connected).unwrap();
    observer
        .wait_for(|state| state.health() == Some(LinkHealth::Connected))
        .await
        .unwrap();

    feed.push(DeviceEvent::Disconnected {
        reason: DisconnectReason::PeerTerminated,
    })
    .unwrap();
    observer
        .wait_for(|state| {
            state.health()
                == Some(LinkHealth::Dropped {
                    reason: DisconnectReason::PeerTerminated,
                })
        })
        .await
        .unwrap();

    // The same activation cycle keeps serving reconnects.
    feed.push(DeviceEvent::Connected).unwrap();
    let state = observer
        .wait_for(|state| state.health() == Some(LinkHealth::Connected))
        .await
        .unwrap();
    assert!(state.health().is_some());

    observer.unsubscribe().await.unwrap();
    assert!(matches!(
        link.current(),
        coldstate_examples::bluetooth::DeviceLinkState::Deinitialized
    ));
}

#[test]
fn reported_values_roundtrip_through_serde() {
    for link in [
        LinkKind::Wifi,
        LinkKind::Cellular,
        LinkKind::Ethernet,
        LinkKind::Offline,
    ] {
        let serialized = serde_json::to_string(&link).unwrap();
        let deserialized: LinkKind = serde_json::from_str(&serialized).unwrap();
        assert_eq!(link, deserialized);
    }

    for status in [
        PermissionStatus::NotDetermined,
        PermissionStatus::Granted,
        PermissionStatus::Denied,
    ] {
        let serialized = serde_json::to_string(&status).unwrap();
        let deserialized: PermissionStatus = serde_json::from_str(&serialized).unwrap();
        assert_eq!(status, deserialized);
    }
}
