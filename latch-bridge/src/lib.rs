//! Latch bridge
//!
//! Relays frames between a Latch lock reached over BLE and a remote
//! controller reached over HTTP.

pub mod config;
mod dispatcher;
pub mod relay;

pub use config::{Config, ConfigError, Credentials};
pub use dispatcher::{DispatchError, Dispatcher};
pub use relay::{Controller, HttpController, RelayError};
