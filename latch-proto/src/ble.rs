//! BLE identifiers for Latch lock devices
//!
//! The lock advertises the service below together with manufacturer data keyed
//! on [`MANUFACTURER_ID`]. Commands are written to the UART TX characteristic and
//! responses arrive as notifications on the UART RX characteristic.

/// 16-bit service identifier advertised by the lock
pub const SERVICE_ID: u16 = 0xFD30;

/// Lock service UUID: 0000fd30-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: u128 = 0x0000fd30_0000_1000_8000_00805f9b34fb;

/// Company identifier under which the lock publishes manufacturer data
pub const MANUFACTURER_ID: u16 = 0x065B;

/// UART TX Characteristic UUID (write, host -> lock)
pub const TX_UUID: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;

/// UART RX Characteristic UUID (notify, lock -> host)
pub const RX_UUID: u128 = 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e;

/// Capability flags carried in the last byte of the manufacturer data
pub mod flags {
    /// Lock is in firmware update mode
    pub const DFU: u8 = 0x08;

    /// Lock is waiting to be installed
    pub const INSTALLABLE: u8 = 0x01;
}

/// Expands a 16-bit Bluetooth SIG identifier to its 128-bit UUID form
pub const fn uuid_from_u16(short: u16) -> u128 {
    0x0000_0000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_uuid_expands_from_short_id() {
        assert_eq!(uuid_from_u16(SERVICE_ID), SERVICE_UUID);
    }
}
