//! btleplug backed transport for Latch locks
//!
//! Scans for advertisements whose manufacturer data passes the
//! [`DiscoveryFilter`], then talks to the lock through its UART
//! characteristics.

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{StreamExt, future};
use latch_proto::ble::{RX_UUID, TX_UUID};
use latch_proto::DiscoveryFilter;
use std::time::Duration;
use uuid::Uuid;

use crate::link::{Drops, Endpoints, Link, Notifications, Transport};
use crate::LinkError;

const TX_CHARACTERISTIC: Uuid = Uuid::from_u128(TX_UUID);
const RX_CHARACTERISTIC: Uuid = Uuid::from_u128(RX_UUID);

/// A device seen during a scan
#[derive(Debug, Clone)]
pub struct LockAdvert {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Whether the advertisement passes the filter the scan was run with
    pub matches: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(LinkError::NoAdapter)
}

/// Scan for BLE devices for `duration`
///
/// Returns every device seen; locks admitted by `filter` have `matches = true`.
pub async fn scan(
    filter: &DiscoveryFilter,
    duration: Duration,
) -> Result<Vec<LockAdvert>, LinkError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let matches = filter.admits(&props.manufacturer_data);

            devices.push(LockAdvert {
                name,
                address,
                rssi: props.rssi,
                matches,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Discovery over the first local adapter
pub struct BtleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleTransport {
    /// Use the default adapter; discovery gives up after `scan_timeout`
    pub async fn new(scan_timeout: Duration) -> Result<Self, LinkError> {
        let adapter = get_adapter().await?;
        Ok(Self {
            adapter,
            scan_timeout,
        })
    }

    async fn admitted(
        &self,
        peripheral: &Peripheral,
        filter: &DiscoveryFilter,
    ) -> Result<bool, LinkError> {
        let props = peripheral.properties().await?;
        Ok(props.is_some_and(|p| filter.admits(&p.manufacturer_data)))
    }

    async fn wait_for_match(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Option<Peripheral>, LinkError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        // the platform may already know the lock from an earlier scan
        for peripheral in self.adapter.peripherals().await? {
            if self.admitted(&peripheral, filter).await? {
                return Ok(Some(peripheral));
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => {
                    if !filter.admits(&manufacturer_data) {
                        continue;
                    }
                    id
                }
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let peripheral = self.adapter.peripheral(&id).await?;
            if self.admitted(&peripheral, filter).await? {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl Transport for BtleTransport {
    type Link = BtleLink;

    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Option<BtleLink>, LinkError> {
        let found = tokio::time::timeout(self.scan_timeout, self.wait_for_match(filter)).await;
        self.adapter.stop_scan().await?;

        let peripheral = match found {
            Ok(result) => result?,
            Err(_) => {
                tracing::info!(timeout = ?self.scan_timeout, "no lock matched before scan timeout");
                None
            }
        };

        Ok(peripheral.map(|peripheral| BtleLink {
            adapter: self.adapter.clone(),
            peripheral,
        }))
    }
}

/// GATT connection to one lock
pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
}

#[async_trait::async_trait]
impl Link for BtleLink {
    type Endpoint = Characteristic;

    fn name(&self) -> String {
        self.peripheral.address().to_string()
    }

    async fn connect(&self) -> Result<(), LinkError> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, LinkError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn resolve(
        &self,
        service: u128,
    ) -> Result<Option<Endpoints<Characteristic>>, LinkError> {
        self.peripheral.discover_services().await?;

        let service = Uuid::from_u128(service);
        let characteristics = self.peripheral.characteristics();
        let find = |uuid| {
            characteristics
                .iter()
                .find(|c| c.service_uuid == service && c.uuid == uuid)
        };

        let tx = find(TX_CHARACTERISTIC);
        let rx = find(RX_CHARACTERISTIC);

        Ok(match (tx, rx) {
            (Some(tx), Some(rx)) => Some(Endpoints {
                outbound: tx.clone(),
                inbound: rx.clone(),
            }),
            _ => None,
        })
    }

    async fn subscribe(&self, inbound: &Characteristic) -> Result<Notifications, LinkError> {
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(inbound).await?;

        let uuid = inbound.uuid;
        Ok(notifications
            .filter_map(move |n| future::ready((n.uuid == uuid).then_some(n.value)))
            .boxed())
    }

    async fn write(&self, outbound: &Characteristic, data: &[u8]) -> Result<(), LinkError> {
        self.peripheral
            .write(outbound, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn drops(&self) -> Result<Drops, LinkError> {
        let id = self.peripheral.id();
        let events = self.adapter.events().await?;
        Ok(events
            .filter_map(move |event| {
                let dropped = matches!(&event, CentralEvent::DeviceDisconnected(d) if *d == id);
                future::ready(dropped.then_some(()))
            })
            .boxed())
    }
}
