//! Manufacturer-data discovery filter derived from a lock serial number
//!
//! Advertised manufacturer data layout (12 bytes, company id excluded):
//!
//! ```text
//! [0..3]   protocol bytes (ignored)
//! [3..7]   serial number, little-endian
//! [7..11]  protocol bytes (ignored)
//! [11]     capability flags (DFU | INSTALLABLE must both be clear)
//! ```

use crate::ble::{MANUFACTURER_ID, SERVICE_ID, flags};

/// Length of the manufacturer-data prefix and mask
pub const PREFIX_LEN: usize = 12;

/// Offset of the little-endian serial inside the prefix
pub const SERIAL_OFFSET: usize = 3;

/// Offset of the capability flag byte inside the prefix
pub const FLAGS_OFFSET: usize = 11;

/// Serial number does not fit in an unsigned 32-bit integer
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("serial {0} does not fit in 32 bits")]
pub struct RangeError(pub u64);

/// Admission criterion for lock discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub service_id: u16,
    pub manufacturer_id: u16,
    pub prefix: [u8; PREFIX_LEN],
    pub mask: [u8; PREFIX_LEN],
}

impl DiscoveryFilter {
    /// Build the filter that admits only the lock with `serial`
    pub fn for_serial(serial: u64) -> Result<Self, RangeError> {
        let serial = u32::try_from(serial).map_err(|_| RangeError(serial))?;

        let mut prefix = [0u8; PREFIX_LEN];
        prefix[SERIAL_OFFSET..SERIAL_OFFSET + 4].copy_from_slice(&serial.to_le_bytes());

        let mut mask = [0u8; PREFIX_LEN];
        mask[SERIAL_OFFSET..SERIAL_OFFSET + 4].fill(0xFF);
        mask[FLAGS_OFFSET] = flags::DFU | flags::INSTALLABLE;

        Ok(Self {
            service_id: SERVICE_ID,
            manufacturer_id: MANUFACTURER_ID,
            prefix,
            mask,
        })
    }

    /// The serial this filter was built for
    pub fn serial(&self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.prefix[SERIAL_OFFSET..SERIAL_OFFSET + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Check one manufacturer-data entry from an advertisement
    pub fn matches(&self, manufacturer_id: u16, data: &[u8]) -> bool {
        if manufacturer_id != self.manufacturer_id || data.len() < PREFIX_LEN {
            return false;
        }
        self.prefix
            .iter()
            .zip(&self.mask)
            .zip(data)
            .all(|((p, m), d)| d & m == p & m)
    }

    /// Check every manufacturer-data entry of an advertisement
    pub fn admits<'a, I>(&self, entries: I) -> bool
    where
        I: IntoIterator<Item = (&'a u16, &'a Vec<u8>)>,
    {
        entries
            .into_iter()
            .any(|(id, data)| self.matches(*id, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn advert(serial: u32, flag_byte: u8) -> Vec<u8> {
        let mut data = vec![0xA5, 0x5A, 0x01];
        data.extend_from_slice(&serial.to_le_bytes());
        data.extend_from_slice(&[0x10, 0x20, 0x30, 0x40]);
        data.push(flag_byte);
        data
    }

    #[test]
    fn prefix_and_mask_layout() {
        let filter = DiscoveryFilter::for_serial(0x1234_5678).unwrap();
        assert_eq!(
            filter.prefix,
            [0x00, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            filter.mask,
            [0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x09]
        );
        assert_eq!(filter.service_id, 0xFD30);
        assert_eq!(filter.manufacturer_id, 0x065B);
    }

    #[test]
    fn serial_above_u32_is_rejected() {
        assert_eq!(
            DiscoveryFilter::for_serial(1 << 32),
            Err(RangeError(1 << 32))
        );
        assert_eq!(
            DiscoveryFilter::for_serial(u64::MAX),
            Err(RangeError(u64::MAX))
        );
        assert!(DiscoveryFilter::for_serial(u32::MAX as u64).is_ok());
    }

    #[test]
    fn matching_ignores_wildcard_bytes() {
        let filter = DiscoveryFilter::for_serial(12345).unwrap();
        assert!(filter.matches(MANUFACTURER_ID, &advert(12345, 0x00)));
        // bits outside the flag mask are free
        assert!(filter.matches(MANUFACTURER_ID, &advert(12345, 0xF6)));

        let mut longer = advert(12345, 0x00);
        longer.extend_from_slice(&[0xDE, 0xAD]);
        assert!(filter.matches(MANUFACTURER_ID, &longer));
    }

    #[test]
    fn matching_rejects_non_targets() {
        let filter = DiscoveryFilter::for_serial(12345).unwrap();
        assert!(!filter.matches(MANUFACTURER_ID, &advert(12346, 0x00)));
        assert!(!filter.matches(0x004C, &advert(12345, 0x00)));
        assert!(!filter.matches(MANUFACTURER_ID, &advert(12345, flags::DFU)));
        assert!(!filter.matches(MANUFACTURER_ID, &advert(12345, flags::INSTALLABLE)));
        assert!(!filter.matches(MANUFACTURER_ID, &advert(12345, 0x00)[..11]));
    }

    #[test]
    fn admits_any_matching_entry() {
        let filter = DiscoveryFilter::for_serial(7).unwrap();
        let entries = std::collections::HashMap::from([
            (0x004Cu16, vec![0u8; 4]),
            (MANUFACTURER_ID, advert(7, 0x00)),
        ]);
        assert!(filter.admits(&entries));
    }

    proptest! {
        #[test]
        fn serial_is_little_endian_at_offset(serial in any::<u32>()) {
            let filter = DiscoveryFilter::for_serial(serial as u64).unwrap();
            prop_assert_eq!(filter.prefix.len(), filter.mask.len());
            prop_assert_eq!(
                &filter.prefix[SERIAL_OFFSET..SERIAL_OFFSET + 4],
                &serial.to_le_bytes()[..]
            );
            prop_assert_eq!(filter.serial(), serial);
            prop_assert!(filter.matches(MANUFACTURER_ID, &advert(serial, 0x00)));
        }

        #[test]
        fn out_of_range_serials_fail(serial in (u32::MAX as u64 + 1)..=u64::MAX) {
            prop_assert_eq!(DiscoveryFilter::for_serial(serial), Err(RangeError(serial)));
        }
    }
}
