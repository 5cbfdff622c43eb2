//! Encrypted, authenticated message channel over a duplex byte stream.
//!
//! A [`SecureChannel`] owns its stream. Dropping the channel, on any
//! path, releases the stream; [`SecureChannel::close`] additionally
//! shuts down the write half so the peer sees a clean EOF.
//!
//! Failure policy:
//! - a frame that fails authentication is reported and the channel
//!   stays `Established`; the caller decides whether to keep reading;
//! - any I/O or framing error closes the channel, since the stream can
//!   no longer be trusted to be on a frame boundary;
//! - a clean EOF from the peer closes the channel without error.

use std::time::Duration;

use ecwire_crypto::{
    FRAME_OVERHEAD, Frame, FrameCipher, KeySchedule, PublicKeyMaterial, Role, SessionKey,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::wire;

/// Default upper bound on a frame body: 1 MiB of plaintext plus overhead.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024 + FRAME_OVERHEAD;

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Keys are still being agreed; callers never hold a channel here.
    Handshaking,
    /// Keys agreed, frames flow.
    Established,
    /// Terminal. No re-keying, no reopening.
    Closed,
}

/// One end of an established secure channel.
pub struct SecureChannel<S> {
    stream: S,
    cipher: FrameCipher,
    role: Role,
    state: ChannelState,
    max_frame_len: usize,
    peer_public: Option<PublicKeyMaterial>,
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("max_frame_len", &self.max_frame_len)
            .finish_non_exhaustive()
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` with keys derived from an agreed session key.
    pub fn new(
        stream: S,
        session_key: &SessionKey,
        role: Role,
        schedule: KeySchedule,
        max_frame_len: usize,
    ) -> Result<Self> {
        let cipher = FrameCipher::from_session_key(session_key, role, schedule)?;
        Ok(Self::established(stream, cipher, role, max_frame_len, None))
    }

    pub(crate) fn established(
        stream: S,
        cipher: FrameCipher,
        role: Role,
        max_frame_len: usize,
        peer_public: Option<PublicKeyMaterial>,
    ) -> Self {
        Self {
            stream,
            cipher,
            role,
            state: ChannelState::Established,
            max_frame_len,
            peer_public,
        }
    }

    pub const fn state(&self) -> ChannelState {
        self.state
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    /// The peer's ephemeral public key, when the channel came from a handshake.
    pub const fn peer_public(&self) -> Option<&PublicKeyMaterial> {
        self.peer_public.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ChannelState::Closed => Err(Error::ChannelClosed),
            ChannelState::Handshaking | ChannelState::Established => Ok(()),
        }
    }

    /// Seal `plaintext` into one frame and write it.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let frame_len = plaintext.len().saturating_add(FRAME_OVERHEAD);
        if frame_len > self.max_frame_len {
            return Err(ecwire_crypto::CryptoError::MalformedFrame(format!(
                "message of {} bytes exceeds frame limit {}",
                plaintext.len(),
                self.max_frame_len
            ))
            .into());
        }

        let frame = self.cipher.seal(plaintext)?;
        if let Err(e) = wire::write_record(&mut self.stream, &frame.to_bytes()).await {
            self.state = ChannelState::Closed;
            debug!(role = %self.role, error = %e, "send failed, channel closed");
            return Err(e);
        }
        trace!(role = %self.role, len = frame_len, "frame sent");
        Ok(())
    }

    /// Read, verify and decrypt the next frame.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let body = match wire::read_record(&mut self.stream, self.max_frame_len).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                self.state = ChannelState::Closed;
                debug!(role = %self.role, "peer closed the channel");
                return Ok(None);
            }
            Err(e) => {
                self.state = ChannelState::Closed;
                debug!(role = %self.role, error = %e, "receive failed, channel closed");
                return Err(e);
            }
        };

        let frame = Frame::parse(&body)?;
        let plaintext = self.cipher.open(&frame)?;
        trace!(role = %self.role, len = body.len(), "frame received");
        Ok(Some(plaintext))
    }

    /// Like [`receive`](Self::receive), but gives up after `limit`.
    ///
    /// A timeout forces the channel to `Closed`: a partially read frame
    /// would leave the stream off its frame boundary.
    pub async fn receive_timeout(&mut self, limit: Duration) -> Result<Option<Vec<u8>>> {
        if let Ok(result) = tokio::time::timeout(limit, self.receive()).await {
            result
        } else {
            self.state = ChannelState::Closed;
            debug!(role = %self.role, ?limit, "receive timed out, channel closed");
            Err(Error::Timeout)
        }
    }

    /// Shut down the write half and release the stream.
    pub async fn close(mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        self.state = ChannelState::Closed;
        self.stream.shutdown().await?;
        debug!(role = %self.role, "channel closed");
        Ok(())
    }
}

/// Create a connected (accepting, initiating) channel pair over an
/// in-memory pipe, for testing.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_channel_pair(
    schedule: KeySchedule,
) -> Result<(
    SecureChannel<tokio::io::DuplexStream>,
    SecureChannel<tokio::io::DuplexStream>,
)> {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (ka, kb) = ecwire_crypto::perform_key_exchange()?;
    Ok((
        SecureChannel::new(a, &ka, Role::Accepting, schedule, DEFAULT_MAX_FRAME_LEN)?,
        SecureChannel::new(b, &kb, Role::Initiating, schedule, DEFAULT_MAX_FRAME_LEN)?,
    ))
}
