//! Encrypted frame layout.
//!
//! A frame is `nonce(12) || ciphertext || tag(16)`. The length prefix
//! that delimits frames on a stream belongs to the transport; this
//! module only deals with a frame's body.

use crate::error::CryptoError;

/// AES-GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed frame: an empty plaintext.
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// One sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the tag appended, as the AEAD produces it.
    sealed: Vec<u8>,
}

impl Frame {
    pub(crate) const fn new(nonce: [u8; NONCE_SIZE], sealed: Vec<u8>) -> Self {
        Self { nonce, sealed }
    }

    /// Split a frame body into its parts.
    ///
    /// Anything shorter than [`FRAME_OVERHEAD`] is rejected here, before
    /// decryption is ever attempted.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(CryptoError::MalformedFrame(format!(
                "frame is {} bytes, minimum is {FRAME_OVERHEAD}",
                bytes.len()
            )));
        }
        let (nonce_bytes, sealed) = bytes.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            sealed: sealed.to_vec(),
        })
    }

    /// Serialize as `nonce || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed);
        out
    }

    pub const fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext without the tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.sealed[..self.sealed.len() - TAG_SIZE]
    }

    pub fn tag(&self) -> &[u8] {
        &self.sealed[self.sealed.len() - TAG_SIZE..]
    }

    pub(crate) fn sealed(&self) -> &[u8] {
        &self.sealed
    }

    /// Total body length in bytes.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.sealed.len()
    }

    /// Frames always carry at least a nonce and a tag.
    pub const fn is_empty(&self) -> bool {
        false
    }
}
