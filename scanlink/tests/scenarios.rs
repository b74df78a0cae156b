//! End-to-end behaviour of the session manager against simulated scanners

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{id, scanner, FakeScanner, Harness};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use scanlink::{
    ConnectionType, EstablishError, Error, Event, EventMask, ExecuteError, ManagerConfig,
    OperatingMode, ResultCode, SessionConfig, SessionState, TerminateError,
};
use scanlink_core::{FirmwareProgress, Notification, Opcode};

fn discovering() -> ManagerConfig {
    ManagerConfig::default().with_discovery(true)
}

#[tokio::test]
async fn test_unrelated_disappearance_keeps_session() {
    let mut harness = Harness::start(discovering());

    let mut scanner7 = harness.connect(scanner(7, ConnectionType::Ble)).await;

    harness.announce(scanner(9, ConnectionType::Ble)).await;
    let available = harness.host.list_available().await.unwrap();
    assert_eq!(available.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![id(9)]);

    harness.discovery.disappeared(id(9));
    assert_eq!(harness.next_event().await, Event::ScannerDisappeared(id(9)));

    let active = harness.host.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id(), id(7));
    assert_eq!(active[0].state, SessionState::Active);

    let host = harness.host.clone();
    let pending = tokio::spawn(async move { host.pull_trigger(id(7)).await });
    let command = scanner7.next_command().await;
    assert_eq!(command.opcode, Opcode::PullTrigger);
    scanner7.respond(&command, ResultCode::Success, &[]).await;
    assert!(pending.await.unwrap().unwrap().is_success());
}

#[tokio::test]
async fn test_available_listing_before_establish() {
    let mut harness = Harness::start(discovering());

    harness.announce(scanner(7, ConnectionType::Ble)).await;
    let available = harness.host.list_available().await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id(), id(7));
    assert_eq!(available[0].name.as_deref(), Some("DS8178-7"));
}

#[tokio::test]
async fn test_establish_unknown_scanner() {
    let harness = Harness::start(discovering());

    let err = harness.host.establish(id(3)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Establish(EstablishError::ScannerNotAvailable(found)) if found == id(3)
    ));
    assert_eq!(err.result_code(), ResultCode::ScannerNotAvailable);
}

#[tokio::test]
async fn test_establish_twice_is_rejected() {
    let mut harness = Harness::start(discovering());
    let _scanner = harness.connect(scanner(4, ConnectionType::Accessory)).await;

    assert!(matches!(
        harness.host.establish(id(4)).await,
        Err(Error::Establish(EstablishError::ScannerNotAvailable(_)))
    ));
    assert_eq!(harness.host.list_active().await.unwrap().len(), 1);
    assert!(harness.host.list_available().await.unwrap().is_empty());
    assert_eq!(harness.connector.open_count(id(4)), 1);
}

#[tokio::test]
async fn test_malformed_frames_force_disconnect() {
    let mut harness = Harness::start(discovering());
    let mut fake = harness.connect(scanner(5, ConnectionType::Ble)).await;

    // Response header for token 0x63 with no result byte
    let malformed = [0x13, 0x88, 0x00, 0x63, 0x00, 0x00];
    for _ in 0..3 {
        fake.send_raw(&malformed).await;
    }

    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(5)));
    assert!(harness.host.list_active().await.unwrap().is_empty());
    assert!(matches!(
        harness.host.terminate(id(5)).await,
        Err(Error::Terminate(TerminateError::ScannerNotActive(_)))
    ));
}

#[tokio::test]
async fn test_terminate_cancels_pending_requests() {
    let mut harness = Harness::start(discovering());

    assert!(matches!(
        harness.host.terminate(id(2)).await,
        Err(Error::Terminate(TerminateError::ScannerNotActive(_)))
    ));

    let mut fake = harness.connect(scanner(2, ConnectionType::Ble)).await;

    let host = harness.host.clone();
    let pending = tokio::spawn(async move { host.capture_image(id(2)).await });
    fake.next_command().await;

    harness.host.terminate(id(2)).await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap().result, ResultCode::Cancelled);

    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(2)));
    // Still in discovery range, so it is available again
    match harness.next_event().await {
        Event::ScannerAppeared(scanner) => assert_eq!(scanner.id(), id(2)),
        other => panic!("expected ScannerAppeared, got {:?}", other),
    }
    assert!(harness.host.list_active().await.unwrap().is_empty());
    assert_eq!(harness.host.list_available().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_auto_reestablish_after_transport_loss() {
    let mut harness = Harness::start(discovering().with_auto_reestablish(true));
    let scanner8 = scanner(8, ConnectionType::Ble);

    let fake = harness.connect(scanner8.clone()).await;
    let mut listener = harness.connector.listen(id(8));

    fake.vanish();
    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(8)));
    assert!(harness.host.list_active().await.unwrap().is_empty());

    harness.announce(scanner8.clone()).await;
    match harness.next_event().await {
        Event::SessionEstablished(snapshot) => assert_eq!(snapshot.id(), id(8)),
        other => panic!("expected SessionEstablished, got {:?}", other),
    }
    let mut fake = FakeScanner::accept(&mut listener).await;

    // Further announcements while active do not start another session
    harness.discovery.appeared(scanner8.clone());
    harness.announce(scanner(10, ConnectionType::Ble)).await;
    assert_eq!(harness.connector.open_count(id(8)), 1);

    let host = harness.host.clone();
    let pending = tokio::spawn(async move { host.release_trigger(id(8)).await });
    let command = fake.next_command().await;
    fake.respond(&command, ResultCode::Success, &[]).await;
    assert!(pending.await.unwrap().unwrap().is_success());
}

#[tokio::test]
async fn test_no_reestablish_when_disabled() {
    let mut harness = Harness::start(discovering());
    let scanner6 = scanner(6, ConnectionType::Accessory);

    harness.connect(scanner6.clone()).await.vanish();
    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(6)));

    harness.announce(scanner6).await;
    assert!(harness.host.list_active().await.unwrap().is_empty());
    assert_eq!(harness.host.list_available().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_per_scanner_reestablish_override() {
    let mut harness = Harness::start(discovering());
    harness.host.set_auto_reestablish_for(id(11), true).await.unwrap();

    let scanner11 = scanner(11, ConnectionType::Ble);
    let fake = harness.connect(scanner11.clone()).await;
    let _listener = harness.connector.listen(id(11));

    fake.vanish();
    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(11)));

    harness.announce(scanner11).await;
    assert!(matches!(
        harness.next_event().await,
        Event::SessionEstablished(snapshot) if snapshot.id() == id(11)
    ));
}

#[tokio::test]
async fn test_host_terminate_never_reestablishes() {
    let mut harness = Harness::start(discovering().with_auto_reestablish(true));
    let _fake = harness.connect(scanner(12, ConnectionType::Ble)).await;

    harness.host.terminate(id(12)).await.unwrap();
    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(12)));
    assert!(matches!(harness.next_event().await, Event::ScannerAppeared(_)));

    harness.discovery.disappeared(id(12));
    assert_eq!(harness.next_event().await, Event::ScannerDisappeared(id(12)));
    harness.announce(scanner(12, ConnectionType::Ble)).await;
    assert!(harness.host.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_operating_mode_filters_discovery() {
    let mut harness =
        Harness::start(discovering().with_operating_mode(OperatingMode::BleOnly));

    harness.discovery.appeared(scanner(20, ConnectionType::Accessory));
    harness.announce(scanner(21, ConnectionType::Ble)).await;

    let available = harness.host.list_available().await.unwrap();
    assert_eq!(available.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![id(21)]);

    harness
        .host
        .set_operating_mode(OperatingMode::AccessoryOnly)
        .await
        .unwrap();
    assert_eq!(harness.next_event().await, Event::ScannerDisappeared(id(21)));
    assert!(harness.host.list_available().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mode_change_keeps_active_sessions() {
    let mut harness = Harness::start(discovering());
    let _fake = harness.connect(scanner(22, ConnectionType::Ble)).await;

    harness
        .host
        .set_operating_mode(OperatingMode::AccessoryOnly)
        .await
        .unwrap();

    let active = harness.host.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id(), id(22));
}

#[tokio::test]
async fn test_discovery_disabled_ignores_appearances() {
    let mut harness = Harness::start(ManagerConfig::default());

    harness.discovery.appeared(scanner(30, ConnectionType::Ble));
    assert!(harness.host.list_available().await.unwrap().is_empty());

    harness.host.enable_discovery(true).await.unwrap();
    harness.announce(scanner(31, ConnectionType::Ble)).await;
    assert_eq!(harness.host.list_available().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reappearance_over_other_transport_is_ignored() {
    let mut harness = Harness::start(discovering());
    let _fake = harness.connect(scanner(40, ConnectionType::Ble)).await;

    harness.discovery.appeared(scanner(40, ConnectionType::Accessory));
    harness.host.terminate(id(40)).await.unwrap();

    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(40)));
    match harness.next_event().await {
        Event::ScannerAppeared(scanner) => {
            assert_eq!(scanner.identity.connection_type, ConnectionType::Ble)
        }
        other => panic!("expected ScannerAppeared, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_establish_returns_scanner() {
    let mut harness = Harness::start(discovering());
    let _listener = harness.connector.listen(id(50));
    harness.connector.reject(id(50), "pairing refused");

    harness.announce(scanner(50, ConnectionType::Ble)).await;
    let err = harness.host.establish(id(50)).await.unwrap_err();
    assert!(matches!(err, Error::Establish(EstablishError::Connect(_))));

    let available = harness.host.list_available().await.unwrap();
    assert_eq!(available.len(), 1);
    assert!(harness.host.list_active().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_command_times_out() {
    let config = discovering()
        .with_session(SessionConfig::default().with_response_timeout(Duration::from_secs(1)));
    let mut harness = Harness::start(config);
    let mut fake = harness.connect(scanner(60, ConnectionType::Ble)).await;

    let host = harness.host.clone();
    let pending = tokio::spawn(async move { host.attributes_get(id(60), &[1, 0x0203]).await });

    let command = fake.next_command().await;
    assert_eq!(command.opcode, Opcode::AttrGet);
    assert_eq!(command.payload, Bytes::from_static(&[0x00, 0x01, 0x02, 0x03]));

    assert_eq!(pending.await.unwrap().unwrap().result, ResultCode::ResponseTimeout);
}

#[tokio::test]
async fn test_execute_passes_through_scanner_result() {
    let mut harness = Harness::start(discovering());
    let mut fake = harness.connect(scanner(61, ConnectionType::Ble)).await;

    let host = harness.host.clone();
    let pending =
        tokio::spawn(async move { host.attribute_set(id(61), vec![0x00, 0x08, 0x01]).await });
    let command = fake.next_command().await;
    fake.respond(&command, ResultCode::ScannerNoSupport, &[]).await;
    assert_eq!(pending.await.unwrap().unwrap().result, ResultCode::ScannerNoSupport);

    let reserved = harness
        .host
        .execute(id(61), Opcode::StartNewFirmware, Bytes::new())
        .await
        .unwrap();
    assert_eq!(reserved.result, ResultCode::OpcodeNotSupported);

    assert!(matches!(
        harness.host.pull_trigger(id(62)).await,
        Err(Error::Execute(ExecuteError::ScannerNotActive(_)))
    ));
}

#[tokio::test]
async fn test_events_keep_per_scanner_order() {
    let mut harness = Harness::start(discovering());
    let mut first = harness.connect(scanner(70, ConnectionType::Ble)).await;
    let mut second = harness.connect(scanner(71, ConnectionType::Accessory)).await;

    let notification = |seq: u8| Notification::Barcode {
        barcode_type: 1,
        data: Bytes::from(vec![seq]),
    };
    for seq in 0..20u8 {
        first.notify(notification(seq)).await;
        second.notify(notification(seq)).await;
    }

    let mut seen: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
    while seen[0].len() + seen[1].len() < 40 {
        match harness.next_event().await {
            Event::BarcodeData { scanner_id, data, .. } => {
                let index = if scanner_id == id(70) { 0 } else { 1 };
                seen[index].push(data[0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    let expected: Vec<u8> = (0..20).collect();
    assert_eq!(seen[0], expected);
    assert_eq!(seen[1], expected);
}

#[tokio::test]
async fn test_event_mask_filters_data() {
    let mut harness = Harness::start(discovering());
    let mut fake = harness.connect(scanner(80, ConnectionType::Ble)).await;

    harness.host.subscribe_events(EventMask::LIFECYCLE | EventMask::FIRMWARE_UPDATE);
    fake.notify(Notification::Image(Bytes::from_static(b"jpeg"))).await;
    fake.notify(Notification::FirmwareUpdate(FirmwareProgress {
        status: 3,
        current_record: 10,
        max_records: 200,
    }))
    .await;

    match harness.next_event().await {
        Event::FirmwareUpdate(update) => {
            assert_eq!(update.scanner_id, id(80));
            assert_eq!(update.current_record, 10);
            assert!(!update.is_finished());
        }
        other => panic!("expected FirmwareUpdate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_terminates_sessions() {
    let mut harness = Harness::start(discovering());
    let _a = harness.connect(scanner(90, ConnectionType::Ble)).await;
    let _b = harness.connect(scanner(91, ConnectionType::Ble)).await;

    harness.host.shutdown().await.unwrap();

    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(90)));
    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(91)));
    assert!(harness.events.next().await.is_none());
    assert!(matches!(
        harness.host.establish(id(90)).await,
        Err(Error::ManagerStopped)
    ));
}

/// Drive one scanner through a sequence of establish (`true`) and terminate
/// (`false`) requests, checking set membership after every step
fn run_establish_terminate(steps: &[bool]) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let mut harness = Harness::start(discovering());
        let mut listener = harness.connector.listen(id(50));
        harness.announce(scanner(50, ConnectionType::Ble)).await;

        let mut link: Option<FakeScanner> = None;
        for &establish in steps {
            let was_active = link.is_some();

            if establish {
                let result = harness.host.establish(id(50)).await;
                if was_active {
                    assert!(matches!(
                        result,
                        Err(Error::Establish(EstablishError::ScannerNotAvailable(_)))
                    ));
                } else {
                    result.unwrap();
                    assert!(matches!(
                        harness.next_event().await,
                        Event::SessionEstablished(snapshot) if snapshot.id() == id(50)
                    ));
                    link = Some(FakeScanner::accept(&mut listener).await);
                }
            } else {
                let result = harness.host.terminate(id(50)).await;
                if was_active {
                    result.unwrap();
                    link = None;
                    assert_eq!(harness.next_event().await, Event::SessionTerminated(id(50)));
                    assert!(matches!(
                        harness.next_event().await,
                        Event::ScannerAppeared(scanner) if scanner.id() == id(50)
                    ));
                } else {
                    assert!(matches!(
                        result,
                        Err(Error::Terminate(TerminateError::ScannerNotActive(_)))
                    ));
                }
            }

            let active: Vec<_> = harness
                .host
                .list_active()
                .await
                .unwrap()
                .iter()
                .map(|snapshot| snapshot.id())
                .collect();
            let available: Vec<_> = harness
                .host
                .list_available()
                .await
                .unwrap()
                .iter()
                .map(|scanner| scanner.id())
                .collect();

            if link.is_some() {
                assert_eq!(active, vec![id(50)]);
                assert!(available.is_empty());
            } else {
                assert!(active.is_empty());
                assert_eq!(available, vec![id(50)]);
            }
        }

        // Each establish that follows a terminate, or starts the run, opens a link
        let opened = steps
            .iter()
            .enumerate()
            .filter(|&(i, &establish)| establish && (i == 0 || !steps[i - 1]))
            .count();
        assert_eq!(harness.connector.open_count(id(50)), opened);
        harness.host.shutdown().await.unwrap();
    });
}

#[test]
fn test_establish_terminate_sequences() {
    run_establish_terminate(&[true, true, false, false, true, false]);
    run_establish_terminate(&[false, true, false, true, true]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_establish_terminate_membership(
        steps in proptest::collection::vec(any::<bool>(), 1..24),
    ) {
        run_establish_terminate(&steps);
    }
}
