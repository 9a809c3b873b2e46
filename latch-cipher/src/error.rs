/// Errors from constructing or driving a [`crate::StreamCipher`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key length {0} (expected 16 bytes)")]
    InvalidKeyLength(usize),
    #[error("invalid nonce length {0} (expected 13 bytes)")]
    InvalidNonceLength(usize),
    /// The 24-bit block counter under this nonce is used up
    #[error("block counter exhausted for this nonce")]
    CounterExhausted,
    #[error("outbound and inbound nonces are identical")]
    NonceReuse,
    #[error("keystream generation failed")]
    Keystream,
}
