//! Runtime settings for the bridge

use std::time::Duration;

use data_encoding::HEXLOWER_PERMISSIVE;
use latch_cipher::{ChannelCipher, CipherError};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} is not valid hex: {source}")]
    Hex {
        field: &'static str,
        source: data_encoding::DecodeError,
    },
    #[error("a cipher key needs both a tx and an rx nonce")]
    IncompleteCredentials,
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub scan_timeout: Duration,
    pub request_timeout: Duration,
    pub credentials: Option<Credentials>,
}

/// Key material for the payload cipher, as supplied by the credential store
#[derive(Clone)]
pub struct Credentials {
    key: Vec<u8>,
    tx_nonce: Vec<u8>,
    rx_nonce: Vec<u8>,
}

impl Credentials {
    /// Parse hex key material; all three present or none at all
    pub fn from_hex(
        key: Option<&str>,
        tx_nonce: Option<&str>,
        rx_nonce: Option<&str>,
    ) -> Result<Option<Self>, ConfigError> {
        let (key, tx_nonce, rx_nonce) = match (key, tx_nonce, rx_nonce) {
            (None, None, None) => return Ok(None),
            (Some(key), Some(tx), Some(rx)) => (key, tx, rx),
            _ => return Err(ConfigError::IncompleteCredentials),
        };
        let credentials = Self {
            key: decode_hex("key", key)?,
            tx_nonce: decode_hex("tx nonce", tx_nonce)?,
            rx_nonce: decode_hex("rx nonce", rx_nonce)?,
        };
        // length and nonce reuse problems are configuration errors, catch them now
        credentials.cipher()?;
        Ok(Some(credentials))
    }

    /// A fresh cipher pair with both counters at zero
    pub fn cipher(&self) -> Result<ChannelCipher, CipherError> {
        ChannelCipher::new(&self.key, &self.tx_nonce, &self.rx_nonce)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

pub fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, ConfigError> {
    HEXLOWER_PERMISSIVE
        .decode(value.trim().as_bytes())
        .map_err(|source| ConfigError::Hex { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "00112233445566778899AABBCCDDEEFF";
    const TX: &str = "01010101010101010101010101";
    const RX: &str = "02020202020202020202020202";

    #[test]
    fn no_credentials_is_plaintext() {
        assert!(Credentials::from_hex(None, None, None).unwrap().is_none());
    }

    #[test]
    fn parses_mixed_case_hex() {
        let credentials = Credentials::from_hex(Some(KEY), Some(TX), Some(&RX.to_lowercase()))
            .unwrap()
            .unwrap();
        let cipher = credentials.cipher().unwrap();
        assert_eq!(cipher.outbound().nonce(), &[0x01; 13]);
        assert_eq!(cipher.inbound().nonce(), &[0x02; 13]);
    }

    #[test]
    fn rejects_partial_or_bad_material() {
        assert!(matches!(
            Credentials::from_hex(Some(KEY), Some(TX), None),
            Err(ConfigError::IncompleteCredentials)
        ));
        assert!(matches!(
            Credentials::from_hex(Some("zz"), Some(TX), Some(RX)),
            Err(ConfigError::Hex { field: "key", .. })
        ));
        assert!(matches!(
            Credentials::from_hex(Some(&KEY[2..]), Some(TX), Some(RX)),
            Err(ConfigError::Cipher(CipherError::InvalidKeyLength(15)))
        ));
        assert!(matches!(
            Credentials::from_hex(Some(KEY), Some(TX), Some(TX)),
            Err(ConfigError::Cipher(CipherError::NonceReuse))
        ));
    }
}
