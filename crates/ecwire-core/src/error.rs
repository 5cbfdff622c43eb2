//! Error types for the ecwire core library.

use ecwire_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using ecwire Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for ecwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key handling, framing, or AEAD failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Handshake aborted; the connection attempt is over
    #[error("Handshake failed: {0}")]
    HandshakeFailed(#[source] Box<Error>),

    /// Send or receive on a channel that is already closed
    #[error("Channel is closed")]
    ChannelClosed,

    /// A bounded wait elapsed
    #[error("Operation timed out")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The underlying crypto error, looking through handshake wrapping.
    pub fn crypto(&self) -> Option<&CryptoError> {
        match self {
            Self::Crypto(e) => Some(e),
            Self::HandshakeFailed(inner) => inner.crypto(),
            _ => None,
        }
    }

    /// Whether this error came from a frame that failed verification.
    ///
    /// Such errors leave the channel usable; the caller decides whether
    /// to keep reading.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.crypto(), Some(CryptoError::AuthenticationFailed))
    }
}
