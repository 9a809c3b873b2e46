//! Latch BLE Controller
//!
//! Discovers a lock by serial number, binds its UART characteristics and keeps
//! them bound across link drops.
//!
//! # Example
//!
//! ```ignore
//! use latch_ble_controller::{ChannelSession, ble::BtleTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BtleTransport::new(Duration::from_secs(15)).await?;
//!     let mut session = ChannelSession::new(transport);
//!
//!     session
//!         .connect(12345, || println!("lock went away"), |frame| println!("{frame:02X?}"))
//!         .await?;
//!     session.send(&[0x01, 0x02]).await?;
//!     session.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
mod error;
mod link;
pub mod mock;
mod session;

pub use error::{ConnectError, LinkError, SendError};
pub use link::{Drops, Endpoints, Link, Notifications, Transport};
pub use session::{ChannelSession, LinkState};
