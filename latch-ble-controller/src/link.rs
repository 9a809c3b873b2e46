//! Platform seam between the session state machine and a BLE stack

use futures::stream::BoxStream;
use latch_proto::DiscoveryFilter;

use crate::LinkError;

/// Payloads notified on the inbound characteristic
pub type Notifications = BoxStream<'static, Vec<u8>>;

/// Yields once every time the platform reports the link dropped
pub type Drops = BoxStream<'static, ()>;

/// Outbound (write) and inbound (notify) characteristic handles
#[derive(Debug, Clone)]
pub struct Endpoints<E> {
    pub outbound: E,
    pub inbound: E,
}

/// Device discovery
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Link;

    /// Find a device admitted by `filter`
    ///
    /// `Ok(None)` when discovery ended without a selection.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Option<Self::Link>, LinkError>;
}

/// Connection to one discovered device
#[async_trait::async_trait]
pub trait Link: Send + Sync + 'static {
    type Endpoint: Clone + Send + Sync + 'static;

    /// Human readable identifier for logs
    fn name(&self) -> String;

    async fn connect(&self) -> Result<(), LinkError>;

    async fn is_connected(&self) -> Result<bool, LinkError>;

    /// Discover services and look up the lock characteristics under `service`
    ///
    /// `Ok(None)` when the device does not expose them.
    async fn resolve(&self, service: u128) -> Result<Option<Endpoints<Self::Endpoint>>, LinkError>;

    async fn subscribe(&self, inbound: &Self::Endpoint) -> Result<Notifications, LinkError>;

    /// Write with response; returns once the device acknowledged
    async fn write(&self, outbound: &Self::Endpoint, data: &[u8]) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;

    async fn drops(&self) -> Result<Drops, LinkError>;
}
