use std::time::Duration;

use latch_ble_controller::mock::{MockLink, MockTransport, advertisement};
use latch_ble_controller::{ChannelSession, ConnectError, LinkState, SendError};
use latch_proto::ble::{MANUFACTURER_ID, flags};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    session: ChannelSession<MockTransport>,
    lock: MockLink,
    drops: mpsc::UnboundedReceiver<()>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

async fn bound(serial: u32) -> Harness {
    let lock = MockLink::lock("lock-a", serial);
    let transport = MockTransport::new(vec![MockLink::lock("other", serial + 1), lock.clone()]);
    let mut session = ChannelSession::new(transport);

    let (drop_tx, drops) = mpsc::unbounded_channel();
    let (frame_tx, frames) = mpsc::unbounded_channel();
    session
        .connect(
            serial as u64,
            move || {
                let _ = drop_tx.send(());
            },
            move |frame| {
                let _ = frame_tx.send(frame);
            },
        )
        .await
        .unwrap();

    Harness {
        session,
        lock,
        drops,
        frames,
    }
}

#[tokio::test]
async fn send_before_connect_is_not_connected() {
    let mut session = ChannelSession::new(MockTransport::default());
    assert_eq!(session.state(), LinkState::Idle);
    assert!(matches!(
        session.send(&[1, 2, 3]).await,
        Err(SendError::NotConnected)
    ));
}

#[tokio::test]
async fn connect_binds_matching_lock_and_writes() {
    let mut h = bound(4242).await;
    assert_eq!(h.session.state(), LinkState::Bound);
    assert_eq!(h.session.serial(), Some(4242));
    assert!(h.lock.connected());
    assert_eq!(h.lock.subscriptions(), 1);

    h.session.send(&[0xCA, 0xFE]).await.unwrap();
    assert_eq!(h.lock.written(), vec![vec![0xCA, 0xFE]]);
}

#[tokio::test]
async fn notifications_reach_callback() {
    let mut h = bound(7).await;
    h.lock.notify(&[0x01, 0x02]);
    h.lock.notify(&[0x03]);

    assert_eq!(timeout(WAIT, h.frames.recv()).await.unwrap(), Some(vec![0x01, 0x02]));
    assert_eq!(timeout(WAIT, h.frames.recv()).await.unwrap(), Some(vec![0x03]));
}

#[tokio::test]
async fn no_matching_device_is_cancelled_selection() {
    let transport = MockTransport::new(vec![
        MockLink::lock("other", 99),
        MockLink::advertising("dfu", MANUFACTURER_ID, advertisement(5, flags::DFU)),
        MockLink::advertising("wrong-company", 0x004C, advertisement(5, 0)),
    ]);
    let mut session = ChannelSession::new(transport);

    let err = session.connect(5, || {}, |_| {}).await.unwrap_err();
    assert!(matches!(err, ConnectError::DeviceSelectionCancelled));
    assert_eq!(session.state(), LinkState::Idle);
    assert!(matches!(session.send(&[0]).await, Err(SendError::NotConnected)));
}

#[tokio::test]
async fn missing_service_is_incorrect_device() {
    let lock = MockLink::lock("impostor", 5).without_service();
    let mut session = ChannelSession::new(MockTransport::new(vec![lock.clone()]));

    let err = session.connect(5, || {}, |_| {}).await.unwrap_err();
    assert!(matches!(err, ConnectError::IncorrectDeviceSelected));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(!lock.connected());
}

#[tokio::test]
async fn oversized_serial_is_rejected_before_scanning() {
    let transport = MockTransport::default();
    let mut session = ChannelSession::new(transport.clone());

    let err = session.connect(1 << 40, || {}, |_| {}).await.unwrap_err();
    assert!(matches!(err, ConnectError::Serial(_)));
    assert_eq!(transport.scans(), 0);
    assert_eq!(session.state(), LinkState::Idle);
}

#[tokio::test]
async fn unsolicited_drop_fires_once_then_send_rebinds() {
    let mut h = bound(31337).await;
    let mut state = h.session.watch_state();

    h.lock.drop_link();
    timeout(WAIT, h.drops.recv()).await.unwrap().unwrap();
    timeout(WAIT, state.wait_for(|s| *s == LinkState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.session.state(), LinkState::Disconnected);

    h.session.send(&[0x10]).await.unwrap();
    assert_eq!(h.session.state(), LinkState::Bound);
    assert_eq!(h.lock.connects(), 2);
    assert_eq!(h.lock.subscriptions(), 2);
    assert_eq!(h.lock.written(), vec![vec![0x10]]);

    // notifications still flow after the rebind
    h.lock.notify(&[0x20]);
    assert_eq!(timeout(WAIT, h.frames.recv()).await.unwrap(), Some(vec![0x20]));

    // a second drop changes state but the callback is gone
    h.lock.drop_link();
    timeout(WAIT, state.wait_for(|s| *s == LinkState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.drops.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_is_idempotent_and_silent() {
    let mut h = bound(1).await;

    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.state(), LinkState::Disconnected);
    assert!(!h.lock.connected());
    assert_eq!(h.session.serial(), None);

    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.state(), LinkState::Disconnected);

    // caller-initiated teardown never reports a drop
    h.lock.drop_link();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.drops.try_recv().is_err());

    assert!(matches!(h.session.send(&[1]).await, Err(SendError::NotConnected)));
}

#[tokio::test]
async fn write_failures_surface_as_link_errors() {
    let mut h = bound(2).await;
    h.lock.set_fail_writes(true);
    assert!(matches!(h.session.send(&[1]).await, Err(SendError::Link(_))));

    h.lock.set_fail_writes(false);
    h.session.send(&[2]).await.unwrap();
    assert_eq!(h.lock.written(), vec![vec![2]]);
}

#[tokio::test]
async fn reconnect_replaces_previous_lock() {
    let first = MockLink::lock("first", 10);
    let second = MockLink::lock("second", 20);
    let mut session =
        ChannelSession::new(MockTransport::new(vec![first.clone(), second.clone()]));

    session.connect(10, || {}, |_| {}).await.unwrap();
    session.connect(20, || {}, |_| {}).await.unwrap();

    assert!(!first.connected());
    assert!(second.connected());
    assert_eq!(session.serial(), Some(20));
}

#[tokio::test]
async fn send_racing_a_drop_rebinds_and_reports_it_once() {
    let mut h = bound(555).await;

    // send notices the drop before the platform event is processed
    h.lock.drop_link();
    h.session.send(&[1]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.session.state(), LinkState::Bound);
    assert!(h.lock.connected());
    assert_eq!(h.lock.written(), vec![vec![1]]);
    assert_eq!(timeout(WAIT, h.drops.recv()).await.unwrap(), Some(()));
    assert!(h.drops.try_recv().is_err());

    h.lock.notify(&[0x30]);
    assert_eq!(timeout(WAIT, h.frames.recv()).await.unwrap(), Some(vec![0x30]));
}

#[tokio::test]
async fn rebind_without_service_is_incorrect_device() {
    let mut h = bound(808).await;
    let mut state = h.session.watch_state();

    h.lock.drop_link();
    timeout(WAIT, state.wait_for(|s| *s == LinkState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    h.lock.set_service(false);

    assert!(matches!(
        h.session.send(&[1]).await,
        Err(SendError::IncorrectDeviceSelected)
    ));
    assert_eq!(h.session.state(), LinkState::Disconnected);
    assert!(!h.lock.connected());
    assert!(h.lock.written().is_empty());
}
