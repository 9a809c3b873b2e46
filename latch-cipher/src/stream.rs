use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher as _};

use crate::CipherError;

/// AES-128-CTR with a 64-bit big-endian counter window
type Aes128Ctr = ctr::Ctr64BE<Aes128>;

pub const KEY_LEN: usize = 16;
pub const NONCE_LEN: usize = 13;
pub const BLOCK_LEN: usize = 16;

/// Number of blocks one nonce can cover (3-byte counter)
pub const MAX_BLOCKS: u32 = 1 << 24;

/// Counter slots consumed by `len` bytes; partial blocks take a full slot
pub fn blocks_for(len: usize) -> u64 {
    len.div_ceil(BLOCK_LEN) as u64
}

/// Symmetric counter-mode transform for one direction of one session
///
/// The same key/nonce pair must never drive two ciphers that process
/// different data.
pub struct StreamCipher {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    block_counter: u32,
}

impl StreamCipher {
    pub fn new(key: &[u8], nonce: &[u8]) -> Result<Self, CipherError> {
        Self::resume(key, nonce, 0)
    }

    /// Continue a session whose counter the caller has kept
    pub fn resume(key: &[u8], nonce: &[u8], block_counter: u32) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| CipherError::InvalidNonceLength(nonce.len()))?;
        if block_counter > MAX_BLOCKS {
            return Err(CipherError::CounterExhausted);
        }
        Ok(Self {
            key,
            nonce,
            block_counter,
        })
    }

    pub fn block_counter(&self) -> u32 {
        self.block_counter
    }

    /// Blocks left under this nonce
    pub fn remaining_blocks(&self) -> u32 {
        MAX_BLOCKS - self.block_counter
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// IV for the next call: nonce followed by the counter as 3 big-endian bytes
    pub fn iv(&self) -> [u8; BLOCK_LEN] {
        let mut iv = [0u8; BLOCK_LEN];
        iv[..NONCE_LEN].copy_from_slice(&self.nonce);
        iv[NONCE_LEN..].copy_from_slice(&self.block_counter.to_be_bytes()[1..]);
        iv
    }

    /// Encrypt or decrypt `data`, returning the transformed bytes
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut buf = data.to_vec();
        self.process_in_place(&mut buf)?;
        Ok(buf)
    }

    /// Encrypt or decrypt `buf` in place
    ///
    /// Fails without touching `buf` or the counter if the call would run past
    /// [`MAX_BLOCKS`].
    pub fn process_in_place(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        let blocks = blocks_for(buf.len());
        if blocks == 0 {
            return Ok(());
        }
        let next = self.block_counter as u64 + blocks;
        if next > MAX_BLOCKS as u64 {
            return Err(CipherError::CounterExhausted);
        }

        let iv = self.iv();
        let mut cipher = Aes128Ctr::new((&self.key).into(), (&iv).into());
        cipher
            .try_apply_keystream(buf)
            .map_err(|_| CipherError::Keystream)?;

        self.block_counter = next as u32;
        Ok(())
    }
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("block_counter", &self.block_counter)
            .finish_non_exhaustive()
    }
}

/// Outbound and inbound ciphers of one channel, sharing a key
#[derive(Debug)]
pub struct ChannelCipher {
    outbound: StreamCipher,
    inbound: StreamCipher,
}

impl ChannelCipher {
    pub fn new(key: &[u8], tx_nonce: &[u8], rx_nonce: &[u8]) -> Result<Self, CipherError> {
        let outbound = StreamCipher::new(key, tx_nonce)?;
        let inbound = StreamCipher::new(key, rx_nonce)?;
        if outbound.nonce == inbound.nonce {
            return Err(CipherError::NonceReuse);
        }
        Ok(Self { outbound, inbound })
    }

    /// Encrypt a frame headed for the lock
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.outbound.process(plaintext)
    }

    /// Decrypt a frame received from the lock
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.inbound.process(ciphertext)
    }

    pub fn outbound(&self) -> &StreamCipher {
        &self.outbound
    }

    pub fn inbound(&self) -> &StreamCipher {
        &self.inbound
    }
}
