//! Latch wire types: discovery filter and controller commands
//!
//! Everything here is pure data. The BLE plumbing lives in
//! `latch-ble-controller` and the controller relay in `latch-bridge`.

pub mod ble;
mod command;
mod filter;

pub use command::{ActivationRequest, Command, RelayRequest};
pub use filter::{DiscoveryFilter, FLAGS_OFFSET, PREFIX_LEN, RangeError, SERIAL_OFFSET};
