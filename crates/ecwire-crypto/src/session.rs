//! AES-256-GCM frame sealing.
//!
//! Every sealed frame draws a fresh 96-bit nonce from the OS CSPRNG.
//! Callers never supply nonces, so reuse cannot be introduced from
//! outside. A cipher refuses to seal more than [`MAX_FRAMES_PER_KEY`]
//! frames, the NIST SP 800-38D bound for random nonces.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;
use crate::exchange::{KeySchedule, Role, SessionKey, TrafficKeys};
use crate::frame::{Frame, NONCE_SIZE};

/// Upper bound on frames sealed under one key with random nonces.
pub const MAX_FRAMES_PER_KEY: u64 = 1 << 32;

/// Seals outbound frames and opens inbound ones for one side of a channel.
pub struct FrameCipher {
    sealer: Aes256Gcm,
    opener: Aes256Gcm,
    frames_sealed: AtomicU64,
}

impl FrameCipher {
    /// Build a cipher from already-derived traffic keys.
    pub fn new(keys: &TrafficKeys) -> Self {
        Self {
            sealer: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(keys.outbound.as_bytes())),
            opener: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(keys.inbound.as_bytes())),
            frames_sealed: AtomicU64::new(0),
        }
    }

    /// Derive traffic keys for `role` and build the cipher.
    pub fn from_session_key(
        session_key: &SessionKey,
        role: Role,
        schedule: KeySchedule,
    ) -> Result<Self, CryptoError> {
        let keys = TrafficKeys::derive(session_key, role, schedule)?;
        Ok(Self::new(&keys))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Frame, CryptoError> {
        self.reserve_frame()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = self
            .sealer
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Frame::new(nonce_bytes, sealed))
    }

    /// Verify and decrypt a frame.
    ///
    /// On tag mismatch nothing is returned; the AEAD never releases
    /// unverified plaintext.
    pub fn open(&self, frame: &Frame) -> Result<Vec<u8>, CryptoError> {
        self.opener
            .decrypt(Nonce::from_slice(frame.nonce()), frame.sealed())
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Count one more frame against the key's budget.
    ///
    /// `Ordering::Relaxed` is enough: only uniqueness of the reserved
    /// slot matters, no other memory is published through the counter.
    fn reserve_frame(&self) -> Result<(), CryptoError> {
        loop {
            let current = self.frames_sealed.load(Ordering::Relaxed);
            if current >= MAX_FRAMES_PER_KEY {
                return Err(CryptoError::NonceExhausted);
            }
            if self
                .frames_sealed
                .compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Number of frames sealed so far.
    pub fn frames_sealed(&self) -> u64 {
        self.frames_sealed.load(Ordering::Relaxed)
    }
}

/// Create a matched (accepting, initiating) pair of ciphers for testing.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_cipher_pair(schedule: KeySchedule) -> Result<(FrameCipher, FrameCipher), CryptoError> {
    let (a, b) = crate::exchange::perform_key_exchange()?;
    Ok((
        FrameCipher::from_session_key(&a, Role::Accepting, schedule)?,
        FrameCipher::from_session_key(&b, Role::Initiating, schedule)?,
    ))
}
