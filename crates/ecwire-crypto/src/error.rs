//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid public key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Peer public key is not a valid P-256 point: {0}")]
    InvalidPeerKey(String),

    #[error("Shared secret is degenerate (all-zero)")]
    WeakSharedSecret,

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Frame authentication failed")]
    AuthenticationFailed,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Nonce budget exhausted for this key")]
    NonceExhausted,

    #[error("Key not found in store: {0}")]
    KeyNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
