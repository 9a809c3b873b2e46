//! In-memory BLE stack for exercising sessions without radio hardware

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use latch_proto::ble::{MANUFACTURER_ID, RX_UUID, SERVICE_UUID, TX_UUID};
use latch_proto::{DiscoveryFilter, FLAGS_OFFSET, PREFIX_LEN, SERIAL_OFFSET};
use tokio::sync::broadcast;

use crate::link::{Drops, Endpoints, Link, Notifications, Transport};
use crate::LinkError;

/// Manufacturer data a lock with `serial` advertises
pub fn advertisement(serial: u32, flags: u8) -> Vec<u8> {
    let mut data = vec![0u8; PREFIX_LEN];
    data[SERIAL_OFFSET..SERIAL_OFFSET + 4].copy_from_slice(&serial.to_le_bytes());
    data[FLAGS_OFFSET] = flags;
    data
}

/// Devices "in range"; discovery picks the first one the filter admits
#[derive(Clone, Default)]
pub struct MockTransport {
    devices: Arc<Mutex<Vec<MockLink>>>,
    scans: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(devices: Vec<MockLink>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            scans: Arc::default(),
        }
    }

    pub fn add(&self, device: MockLink) {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner).push(device);
    }

    /// Number of discovery runs so far
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Option<MockLink>, LinkError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(devices
            .iter()
            .find(|d| filter.admits(&d.inner.manufacturer_data))
            .cloned())
    }
}

/// A fake lock; clones share state so tests can drive the device side
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    manufacturer_data: HashMap<u16, Vec<u8>>,
    has_service: AtomicBool,
    connected: AtomicBool,
    connects: AtomicUsize,
    subscriptions: AtomicUsize,
    fail_writes: AtomicBool,
    written: Mutex<Vec<Vec<u8>>>,
    notify_tx: broadcast::Sender<Vec<u8>>,
    drop_tx: broadcast::Sender<()>,
}

impl MockLink {
    /// A lock advertising `serial` with no capability flags set
    pub fn lock(name: &str, serial: u32) -> Self {
        Self::advertising(name, MANUFACTURER_ID, advertisement(serial, 0))
    }

    pub fn advertising(name: &str, manufacturer_id: u16, data: Vec<u8>) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        let (drop_tx, _) = broadcast::channel(8);
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                manufacturer_data: HashMap::from([(manufacturer_id, data)]),
                has_service: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
                notify_tx,
                drop_tx,
            }),
        }
    }

    /// Device that advertises correctly but lacks the lock characteristics
    pub fn without_service(self) -> Self {
        self.set_service(false);
        self
    }

    /// Add or remove the lock service, as a firmware update might
    pub fn set_service(&self, present: bool) {
        self.inner.has_service.store(present, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Emit a notification on the inbound characteristic
    pub fn notify(&self, payload: &[u8]) {
        let _ = self.inner.notify_tx.send(payload.to_vec());
    }

    /// Simulate the lock dropping the link
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self.inner.drop_tx.send(());
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Payloads acknowledged so far, oldest first
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn receiver_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> futures::stream::BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait::async_trait]
impl Link for MockLink {
    type Endpoint = u128;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    async fn connect(&self) -> Result<(), LinkError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, LinkError> {
        Ok(self.connected())
    }

    async fn resolve(&self, service: u128) -> Result<Option<Endpoints<u128>>, LinkError> {
        if !self.connected() {
            return Err(LinkError::Unavailable("not connected".to_string()));
        }
        if service != SERVICE_UUID || !self.inner.has_service.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Endpoints {
            outbound: TX_UUID,
            inbound: RX_UUID,
        }))
    }

    async fn subscribe(&self, inbound: &u128) -> Result<Notifications, LinkError> {
        if *inbound != RX_UUID {
            return Err(LinkError::Unavailable("not a notify characteristic".to_string()));
        }
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(receiver_stream(self.inner.notify_tx.subscribe()))
    }

    async fn write(&self, outbound: &u128, data: &[u8]) -> Result<(), LinkError> {
        if !self.connected() || self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::Unavailable("write failed".to_string()));
        }
        if *outbound != TX_UUID {
            return Err(LinkError::Unavailable("not a write characteristic".to_string()));
        }
        self.inner.written.lock().unwrap_or_else(PoisonError::into_inner).push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn drops(&self) -> Result<Drops, LinkError> {
        Ok(receiver_stream(self.inner.drop_tx.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_proto::ble::{SERVICE_ID, uuid_from_u16};

    #[tokio::test]
    async fn resolves_only_under_lock_service() {
        let lock = MockLink::lock("lock", 1);
        lock.connect().await.unwrap();

        let endpoints = lock.resolve(uuid_from_u16(SERVICE_ID)).await.unwrap().unwrap();
        assert_eq!(endpoints.outbound, TX_UUID);
        assert_eq!(endpoints.inbound, RX_UUID);

        assert!(lock.resolve(uuid_from_u16(0x180F)).await.unwrap().is_none());

        lock.set_service(false);
        assert!(lock.resolve(SERVICE_UUID).await.unwrap().is_none());
    }
}
