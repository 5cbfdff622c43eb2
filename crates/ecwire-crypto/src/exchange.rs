//! Key agreement and key derivation.
//!
//! P-256 ECDH between the local ephemeral secret and the peer's public
//! point yields a 32-byte shared secret. HKDF-SHA256 (no salt, info
//! `"handshake data"`) turns it into the 32-byte session key. Under the
//! default [`KeySchedule::Directional`], the session key is expanded
//! once more into one traffic key per direction.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::keypair::{EphemeralKeyPair, PublicKeyMaterial};

/// HKDF info label for session key derivation.
pub const HKDF_INFO: &[u8] = b"handshake data";

/// Traffic key label for frames sent by the accepting peer.
const ACCEPTING_TO_INITIATING: &[u8] = b"handshake data: accepting to initiating";

/// Traffic key label for frames sent by the initiating peer.
const INITIATING_TO_ACCEPTING: &[u8] = b"handshake data: initiating to accepting";

/// Size of the derived symmetric key (AES-256).
pub const SESSION_KEY_SIZE: usize = 32;

/// Which side of the handshake a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepts the connection and sends its public key first.
    Accepting,
    /// Opens the connection and sends its public key second.
    Initiating,
}

impl Role {
    /// The role on the other end of the connection.
    pub const fn peer(self) -> Self {
        match self {
            Self::Accepting => Self::Initiating,
            Self::Initiating => Self::Accepting,
        }
    }

    /// Short name used for logs and key-store entries.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepting => "server",
            Self::Initiating => "client",
        }
    }

    const fn outbound_label(self) -> &'static [u8] {
        match self {
            Self::Accepting => ACCEPTING_TO_INITIATING,
            Self::Initiating => INITIATING_TO_ACCEPTING,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the session key is turned into traffic keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySchedule {
    /// One traffic key per direction, expanded from the session key.
    #[default]
    Directional,
    /// The session key itself protects both directions.
    Shared,
}

/// Raw ECDH output. Used once as KDF input, then dropped.
pub struct SharedSecret(Zeroizing<[u8; 32]>);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

impl SharedSecret {
    /// Wrap raw secret bytes, e.g. for known-answer tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// The 32-byte symmetric key for one connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl SessionKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

/// Perform P-256 ECDH with the peer's public key.
///
/// Rejects points off the curve and degenerate (all-zero) results.
pub fn derive_shared_secret(
    local: &EphemeralKeyPair,
    remote: &PublicKeyMaterial,
) -> Result<SharedSecret, CryptoError> {
    let remote_point = remote.to_point()?;
    let shared = p256::ecdh::diffie_hellman(
        local.secret().to_nonzero_scalar(),
        remote_point.as_affine(),
    );

    let mut bytes = Zeroizing::new([0u8; 32]);
    bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
    reject_degenerate(&bytes)?;
    Ok(SharedSecret(bytes))
}

fn reject_degenerate(secret: &[u8; 32]) -> Result<(), CryptoError> {
    if bool::from(secret.ct_eq(&[0u8; 32])) {
        return Err(CryptoError::WeakSharedSecret);
    }
    Ok(())
}

/// HKDF-SHA256 with no salt and info `"handshake data"`, 32-byte output.
pub fn derive_session_key(shared_secret: &SharedSecret) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; SESSION_KEY_SIZE];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SessionKey(key))
}

/// Per-direction keys held by one side of a channel.
#[derive(Debug)]
pub struct TrafficKeys {
    pub(crate) outbound: SessionKey,
    pub(crate) inbound: SessionKey,
}

impl TrafficKeys {
    /// Derive the keys `role` seals and opens with.
    pub fn derive(
        session_key: &SessionKey,
        role: Role,
        schedule: KeySchedule,
    ) -> Result<Self, CryptoError> {
        match schedule {
            KeySchedule::Shared => Ok(Self {
                outbound: session_key.clone(),
                inbound: session_key.clone(),
            }),
            KeySchedule::Directional => {
                let hk = Hkdf::<Sha256>::from_prk(session_key.as_bytes())
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
                Ok(Self {
                    outbound: expand_label(&hk, role.outbound_label())?,
                    inbound: expand_label(&hk, role.peer().outbound_label())?,
                })
            }
        }
    }
}

fn expand_label(hk: &Hkdf<Sha256>, label: &[u8]) -> Result<SessionKey, CryptoError> {
    let mut key = [0u8; SESSION_KEY_SIZE];
    hk.expand(label, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SessionKey(key))
}

/// Run both halves of an exchange locally and return each side's session key.
///
/// Mainly useful for testing. In production each side generates its own
/// pair, sends the public half, and derives from the peer's.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange() -> Result<(SessionKey, SessionKey), CryptoError> {
    let accepting = EphemeralKeyPair::generate()?;
    let initiating = EphemeralKeyPair::generate()?;

    let a = derive_session_key(&derive_shared_secret(
        &accepting,
        &initiating.public_material(),
    )?)?;
    let b = derive_session_key(&derive_shared_secret(
        &initiating,
        &accepting.public_material(),
    )?)?;
    Ok((a, b))
}
