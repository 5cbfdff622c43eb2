//! Ephemeral P-256 keypairs.
//!
//! Every connection attempt generates a fresh keypair. Only the public
//! half ever leaves this module in transmissible form; the secret scalar
//! is zeroized when the keypair is dropped.
//!
//! Public keys travel as SEC1 uncompressed points (`0x04 || X || Y`,
//! 65 bytes). The fixed length and leading tag make the encoding
//! unambiguous on a stream that carries no framing of its own.

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// The only curve this protocol speaks. There is no negotiation.
pub const CURVE_NAME: &str = "P-256";

/// Length of a SEC1 uncompressed P-256 point.
pub const PUBLIC_KEY_SIZE: usize = 65;

/// SEC1 tag byte for an uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Scalar candidates drawn before giving up on generation.
const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Encoded public key as it appears on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial {
    bytes: [u8; PUBLIC_KEY_SIZE],
}

impl std::fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKeyMaterial")
            .field(&hex::encode(self.bytes))
            .finish()
    }
}

impl PublicKeyMaterial {
    /// Decode a received public key.
    ///
    /// Checks the encoding only: length, tag, and SEC1 structure. Whether
    /// the point lies on the curve is decided at exchange time, where a
    /// failure surfaces as `InvalidPeerKey`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "expected {PUBLIC_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != UNCOMPRESSED_TAG {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "expected uncompressed point tag 0x04, got {:#04x}",
                bytes[0]
            )));
        }
        EncodedPoint::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;

        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Raw wire bytes.
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.bytes
    }

    /// Resolve to a curve point, rejecting anything off P-256.
    pub(crate) fn to_point(&self) -> Result<PublicKey, CryptoError> {
        let encoded = EncodedPoint::from_bytes(self.bytes)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Option::<PublicKey>::from(PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| CryptoError::InvalidPeerKey("point is not on the P-256 curve".into()))
    }

    /// PEM-encoded SubjectPublicKeyInfo (`PUBLIC KEY`).
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.to_point()?
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    /// Parse a PEM-encoded SubjectPublicKeyInfo.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let point = PublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Ok(Self::from_point(&point))
    }

    fn from_point(point: &PublicKey) -> Self {
        let encoded = point.to_encoded_point(false);
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(encoded.as_bytes());
        Self { bytes }
    }

    /// Colon-separated SHA-256 fingerprint of the wire encoding.
    ///
    /// Useful for comparing keys out of band. The handshake itself never
    /// consults it.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.bytes)
    }
}

/// An ephemeral P-256 keypair, owned by exactly one peer.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKeyMaterial,
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(self.public.bytes))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl EphemeralKeyPair {
    /// Generate a fresh keypair from the OS entropy source.
    ///
    /// Entropy failure is reported, never retried.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut candidate = Zeroizing::new([0u8; 32]);
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            OsRng
                .try_fill_bytes(&mut candidate[..])
                .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
            // Rejects zero and values >= the group order.
            if let Ok(secret) = SecretKey::from_slice(&candidate[..]) {
                return Ok(Self::from_secret(secret));
            }
        }
        Err(CryptoError::KeyGenerationFailed(
            "no valid scalar drawn from entropy source".into(),
        ))
    }

    /// Rebuild a keypair from a 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "P-256 private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidKeyEncoding("invalid P-256 scalar".into()))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKeyMaterial::from_point(&secret.public_key());
        Self { secret, public }
    }

    /// The transmissible public half.
    pub fn public_material(&self) -> PublicKeyMaterial {
        self.public.clone()
    }

    pub(crate) const fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// SEC1 `EC PRIVATE KEY` PEM. Handle with care.
    pub fn to_private_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.secret
            .to_sec1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    /// Parse a SEC1 `EC PRIVATE KEY` PEM.
    pub fn from_private_pem(pem: &str) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_sec1_pem(pem)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
