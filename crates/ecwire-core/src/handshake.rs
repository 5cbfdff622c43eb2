//! Ephemeral ECDH handshake over a connected byte stream.
//!
//! Both roles run the same cryptographic steps; only the order of the
//! single public-key send and receive differs. The accepting side sends
//! first and the initiating side receives first, so two blocking peers
//! never both sit in a write waiting for the other to read.
//!
//! ```text
//! accepting                          initiating
//!   generate pair                      generate pair
//!   send   [len | pubkey] ───────────▶ receive
//!   receive ◀─────────── [len | pubkey] send
//!   ECDH → HKDF → traffic keys         ECDH → HKDF → traffic keys
//! ```
//!
//! Any failure aborts the attempt with a single `HandshakeFailed`. The
//! stream is dropped with it; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use ecwire_crypto::keystore::save_keypair;
use ecwire_crypto::{
    EphemeralKeyPair, FrameCipher, KeySchedule, KeyStore, PUBLIC_KEY_SIZE, PublicKeyMaterial,
    Role, SessionKey, derive_session_key, derive_shared_secret,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, DEFAULT_MAX_FRAME_LEN, SecureChannel};
use crate::error::{Error, Result};
use crate::wire;

/// Largest public-key record accepted from a peer.
pub const MAX_PUBLIC_KEY_RECORD: usize = 1024;

/// Default bound on the whole key exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Knobs for one handshake.
#[derive(Clone)]
pub struct HandshakeSettings {
    /// How the session key becomes traffic keys. Both peers must agree.
    pub key_schedule: KeySchedule,
    /// Largest frame body the resulting channel accepts.
    pub max_frame_len: usize,
    /// Bound on the key exchange; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Where key material goes when persistence or export is enabled.
    pub key_store: Option<Arc<dyn KeyStore>>,
    /// Persist this side's ephemeral keypair as PEM.
    pub persist_keys: bool,
    /// Write the derived session key to the store. Debugging only.
    pub export_session_key: bool,
}

impl std::fmt::Debug for HandshakeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSettings")
            .field("key_schedule", &self.key_schedule)
            .field("max_frame_len", &self.max_frame_len)
            .field("timeout", &self.timeout)
            .field("key_store", &self.key_store.is_some())
            .field("persist_keys", &self.persist_keys)
            .field("export_session_key", &self.export_session_key)
            .finish()
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            key_schedule: KeySchedule::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            key_store: None,
            persist_keys: false,
            export_session_key: false,
        }
    }
}

/// Run the accepting side: send our key first, then read the peer's.
pub async fn accept<S>(stream: S, settings: &HandshakeSettings) -> Result<SecureChannel<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    run(stream, Role::Accepting, settings).await
}

/// Run the initiating side: read the peer's key first, then send ours.
pub async fn initiate<S>(stream: S, settings: &HandshakeSettings) -> Result<SecureChannel<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    run(stream, Role::Initiating, settings).await
}

struct Negotiated {
    cipher: FrameCipher,
    peer_public: PublicKeyMaterial,
}

async fn run<S>(mut stream: S, role: Role, settings: &HandshakeSettings) -> Result<SecureChannel<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(%role, state = ?ChannelState::Handshaking, "handshake started");

    let outcome = match settings.timeout {
        Some(limit) => tokio::time::timeout(limit, exchange_keys(&mut stream, role, settings))
            .await
            .unwrap_or(Err(Error::Timeout)),
        None => exchange_keys(&mut stream, role, settings).await,
    };

    match outcome {
        Ok(negotiated) => {
            info!(
                %role,
                peer_fingerprint = %negotiated.peer_public.fingerprint(),
                schedule = ?settings.key_schedule,
                "secure channel established"
            );
            Ok(SecureChannel::established(
                stream,
                negotiated.cipher,
                role,
                settings.max_frame_len,
                Some(negotiated.peer_public),
            ))
        }
        Err(e) => {
            warn!(%role, error = %e, "handshake failed");
            Err(Error::HandshakeFailed(Box::new(e)))
        }
    }
}

async fn exchange_keys<S>(
    stream: &mut S,
    role: Role,
    settings: &HandshakeSettings,
) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let local = EphemeralKeyPair::generate()?;
    let local_public = local.public_material();

    let peer_public = match role {
        Role::Accepting => {
            send_public(stream, &local_public).await?;
            receive_public(stream).await?
        }
        Role::Initiating => {
            let peer = receive_public(stream).await?;
            send_public(stream, &local_public).await?;
            peer
        }
    };
    debug!(%role, "public keys exchanged");

    let shared = derive_shared_secret(&local, &peer_public)?;
    let session_key = derive_session_key(&shared)?;
    drop(shared);

    if let Some(store) = &settings.key_store {
        persist(store.as_ref(), role, &local, &session_key, settings)?;
    }

    let cipher = FrameCipher::from_session_key(&session_key, role, settings.key_schedule)?;
    Ok(Negotiated {
        cipher,
        peer_public,
    })
}

async fn send_public<S>(stream: &mut S, public: &PublicKeyMaterial) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    wire::write_record(stream, public.as_bytes()).await
}

async fn receive_public<S>(stream: &mut S) -> Result<PublicKeyMaterial>
where
    S: AsyncRead + Unpin,
{
    let bytes = wire::read_record(stream, MAX_PUBLIC_KEY_RECORD)
        .await?
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed the stream before sending its public key",
            )
        })?;
    if bytes.len() != PUBLIC_KEY_SIZE {
        debug!(len = bytes.len(), "peer public key has unexpected length");
    }
    Ok(PublicKeyMaterial::decode(&bytes)?)
}

fn persist(
    store: &dyn KeyStore,
    role: Role,
    local: &EphemeralKeyPair,
    session_key: &SessionKey,
    settings: &HandshakeSettings,
) -> Result<()> {
    if settings.persist_keys {
        save_keypair(store, role.as_str(), local)?;
        debug!(%role, "ephemeral keypair persisted");
    }
    if settings.export_session_key {
        warn!(%role, "exporting session key to key store; never enable this in production");
        store.save(
            &format!("symmetric_key_{}.key", role.as_str()),
            session_key.as_bytes(),
        )?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use ecwire_crypto::{CryptoError, MemoryKeyStore};

    #[tokio::test]
    async fn both_roles_reach_established_channel() {
        let (a, b) = tokio::io::duplex(4096);
        let settings = HandshakeSettings::default();

        let (server, client) = tokio::join!(accept(a, &settings), initiate(b, &settings));
        let mut server = server.unwrap();
        let mut client = client.unwrap();

        assert_eq!(server.state(), ChannelState::Established);
        assert_eq!(server.role(), Role::Accepting);
        assert_eq!(client.role(), Role::Initiating);

        server.send(b"ping").await.unwrap();
        assert_eq!(client.receive().await.unwrap().unwrap(), b"ping");
        client.send(b"pong").await.unwrap();
        assert_eq!(server.receive().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn peers_see_each_others_public_keys() {
        let (a, b) = tokio::io::duplex(4096);
        let settings = HandshakeSettings::default();
        let (server, client) = tokio::join!(accept(a, &settings), initiate(b, &settings));
        let server = server.unwrap();
        let client = client.unwrap();

        let server_view = server.peer_public().unwrap().fingerprint();
        let client_view = client.peer_public().unwrap().fingerprint();
        assert_ne!(server_view, client_view);
    }

    #[tokio::test]
    async fn tiny_pipe_does_not_deadlock() {
        let (a, b) = tokio::io::duplex(1);
        let settings = HandshakeSettings::default();
        let (server, client) = tokio::join!(accept(a, &settings), initiate(b, &settings));
        assert!(server.is_ok());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn garbage_public_key_fails_handshake() {
        let (a, mut raw) = tokio::io::duplex(4096);
        let settings = HandshakeSettings::default();
        let peer = tokio::spawn(async move {
            let _ = wire::read_record(&mut raw, MAX_PUBLIC_KEY_RECORD).await;
            wire::write_record(&mut raw, b"not a key").await.unwrap();
            raw
        });

        let err = accept(a, &settings).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
        assert!(matches!(
            err.crypto(),
            Some(CryptoError::InvalidKeyEncoding(_))
        ));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn off_curve_public_key_fails_handshake() {
        let (mut raw, b) = tokio::io::duplex(4096);
        let settings = HandshakeSettings::default();
        let peer = tokio::spawn(async move {
            let mut bogus = [0u8; PUBLIC_KEY_SIZE];
            bogus[0] = 0x04;
            wire::write_record(&mut raw, &bogus).await.unwrap();
            let _ = wire::read_record(&mut raw, MAX_PUBLIC_KEY_RECORD).await;
            raw
        });

        let err = initiate(b, &settings).await.unwrap_err();
        assert!(matches!(err.crypto(), Some(CryptoError::InvalidPeerKey(_))));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn oversized_public_key_record_fails_handshake() {
        let (mut raw, b) = tokio::io::duplex(4096);
        let settings = HandshakeSettings::default();
        let peer = tokio::spawn(async move {
            wire::write_record(&mut raw, &[0x04; MAX_PUBLIC_KEY_RECORD + 1])
                .await
                .unwrap();
            raw
        });

        let err = initiate(b, &settings).await.unwrap_err();
        assert!(matches!(err.crypto(), Some(CryptoError::MalformedFrame(_))));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn peer_hangup_fails_handshake() {
        let (a, raw) = tokio::io::duplex(4096);
        drop(raw);
        let err = initiate(a, &HandshakeSettings::default()).await.unwrap_err();
        match err {
            Error::HandshakeFailed(inner) => assert!(matches!(*inner, Error::Io(_))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (a, _silent) = tokio::io::duplex(4096);
        let settings = HandshakeSettings {
            timeout: Some(Duration::from_millis(50)),
            ..HandshakeSettings::default()
        };
        let err = initiate(a, &settings).await.unwrap_err();
        match err {
            Error::HandshakeFailed(inner) => assert!(matches!(*inner, Error::Timeout)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_key_schedules_cannot_talk() {
        let (a, b) = tokio::io::duplex(4096);
        let directional = HandshakeSettings::default();
        let shared = HandshakeSettings {
            key_schedule: KeySchedule::Shared,
            ..HandshakeSettings::default()
        };
        let (server, client) = tokio::join!(accept(a, &directional), initiate(b, &shared));
        let mut server = server.unwrap();
        let mut client = client.unwrap();

        client.send(b"hello").await.unwrap();
        assert!(server.receive().await.unwrap_err().is_authentication_failure());
    }

    #[tokio::test]
    async fn persists_keys_only_when_asked() {
        let server_store = Arc::new(MemoryKeyStore::new());
        let client_store = Arc::new(MemoryKeyStore::new());
        let server_settings = HandshakeSettings {
            key_store: Some(server_store.clone()),
            persist_keys: true,
            ..HandshakeSettings::default()
        };
        let client_settings = HandshakeSettings {
            key_store: Some(client_store.clone()),
            ..HandshakeSettings::default()
        };

        let (a, b) = tokio::io::duplex(4096);
        let (server, client) =
            tokio::join!(accept(a, &server_settings), initiate(b, &client_settings));
        let server = server.unwrap();
        client.unwrap();

        assert_eq!(
            server_store.names(),
            vec!["server_private_key.pem", "server_public_key.pem"]
        );
        assert!(client_store.names().is_empty());

        let stored = ecwire_crypto::keystore::load_public_key(server_store.as_ref(), "server")
            .unwrap();
        assert_eq!(server.state(), ChannelState::Established);
        assert_eq!(stored.as_bytes().len(), PUBLIC_KEY_SIZE);
    }

    #[tokio::test]
    async fn exported_session_keys_match() {
        let server_store = Arc::new(MemoryKeyStore::new());
        let client_store = Arc::new(MemoryKeyStore::new());
        let settings_for = |store: Arc<MemoryKeyStore>| HandshakeSettings {
            key_store: Some(store),
            export_session_key: true,
            ..HandshakeSettings::default()
        };

        let (a, b) = tokio::io::duplex(4096);
        let server_settings = settings_for(server_store.clone());
        let client_settings = settings_for(client_store.clone());
        let (server, client) =
            tokio::join!(accept(a, &server_settings), initiate(b, &client_settings));
        server.unwrap();
        client.unwrap();

        let server_key = server_store.load("symmetric_key_server.key").unwrap();
        let client_key = client_store.load("symmetric_key_client.key").unwrap();
        assert_eq!(server_key.len(), 32);
        assert_eq!(server_key.as_slice(), client_key.as_slice());
    }
}
