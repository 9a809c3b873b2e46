//! Counter-mode payload cipher for the Latch device channel
//!
//! Payloads crossing the BLE link are protected with AES-128-CTR. The 16-byte
//! IV is a fixed 13-byte session nonce followed by a 3-byte big-endian block
//! counter, so one nonce covers at most [`MAX_BLOCKS`] blocks (16 MiB).
//!
//! # Example
//!
//! ```
//! use latch_cipher::StreamCipher;
//!
//! let key = [0x11; 16];
//! let nonce = [0x22; 13];
//!
//! let mut sealer = StreamCipher::new(&key, &nonce)?;
//! let mut opener = StreamCipher::new(&key, &nonce)?;
//!
//! let sealed = sealer.process(b"unlock")?;
//! assert_eq!(opener.process(&sealed)?, b"unlock");
//! # Ok::<(), latch_cipher::CipherError>(())
//! ```

mod error;
mod stream;

pub use error::CipherError;
pub use stream::{
    BLOCK_LEN, ChannelCipher, KEY_LEN, MAX_BLOCKS, NONCE_LEN, StreamCipher, blocks_for,
};
