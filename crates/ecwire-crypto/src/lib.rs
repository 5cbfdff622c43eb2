//! ecwire Encryption Library
//!
//! Cryptographic building blocks for an ephemeral-ECDH secure channel
//! over a raw byte stream.
//!
//! ## Crypto primitives
//!
//! - **Key pairs**: ephemeral P-256, SEC1 uncompressed public keys on the wire
//! - **Agreement**: P-256 ECDH → HKDF-SHA256 (no salt, info `"handshake data"`) → 32-byte key
//! - **Encryption**: AES-256-GCM, fresh random 96-bit nonce per frame, 16-byte tag

#[cfg(feature = "certs")]
pub mod certs;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod keypair;
pub mod keystore;
pub mod session;

pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{
    KeySchedule, Role, SessionKey, SharedSecret, TrafficKeys, derive_session_key,
    derive_shared_secret,
};
pub use frame::{FRAME_OVERHEAD, Frame, NONCE_SIZE, TAG_SIZE};
pub use keypair::{CURVE_NAME, EphemeralKeyPair, PUBLIC_KEY_SIZE, PublicKeyMaterial, fingerprint_of};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
#[cfg(any(test, feature = "test-utils"))]
pub use session::test_cipher_pair;
pub use session::{FrameCipher, MAX_FRAMES_PER_KEY};
