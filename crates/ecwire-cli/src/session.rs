//! Interactive client loop and the server's acknowledging session.
//!
//! Both are generic over the channel's stream and the terminal handles so
//! they run unchanged against TCP sockets and in-memory pipes.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use ecwire_core::{Error, SecureChannel};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Reply the server sends for every message it accepts.
pub const ACK_MESSAGE: &str = "Message received";

/// Prompt printed before each line of client input.
pub const PROMPT: &str = "Enter message (or 'exit' to quit): ";

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The user typed `exit`.
    UserQuit,
    /// Input reached end of file.
    InputClosed,
    /// The server closed the connection.
    PeerClosed,
}

/// Prompt for lines on `input`, send each one, and print the reply.
///
/// `exit` (any case, surrounding whitespace ignored) ends the session
/// without sending anything. Empty lines are skipped.
pub async fn run_client<S, R, W>(
    channel: &mut SecureChannel<S>,
    mut input: R,
    mut output: W,
) -> Result<ClientExit>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            return Ok(ClientExit::InputClosed);
        }
        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") {
            return Ok(ClientExit::UserQuit);
        }
        if message.is_empty() {
            continue;
        }

        channel
            .send(message.as_bytes())
            .await
            .context("Failed to send message")?;

        match channel.receive().await {
            Ok(Some(reply)) => {
                let text = String::from_utf8_lossy(&reply);
                output
                    .write_all(format!("Server reply: {text}\n").as_bytes())
                    .await?;
            }
            Ok(None) => {
                output.write_all(b"Server closed the connection\n").await?;
                output.flush().await?;
                return Ok(ClientExit::PeerClosed);
            }
            Err(e) if e.is_authentication_failure() => {
                warn!("reply failed authentication, discarded");
            }
            Err(e) => return Err(e).context("Failed to receive reply"),
        }
    }
}

/// Serve one accepted channel: acknowledge every message until the peer
/// leaves, the idle bound elapses, or the stream fails.
///
/// Frames that fail authentication are dropped and the session goes on.
pub async fn serve_session<S>(
    mut channel: SecureChannel<S>,
    peer: SocketAddr,
    idle_timeout: Option<Duration>,
) -> u64
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut acknowledged = 0u64;
    loop {
        let received = match idle_timeout {
            Some(limit) => channel.receive_timeout(limit).await,
            None => channel.receive().await,
        };
        match received {
            Ok(Some(message)) => {
                info!(%peer, message = %String::from_utf8_lossy(&message), "received");
                if let Err(e) = channel.send(ACK_MESSAGE.as_bytes()).await {
                    warn!(%peer, error = %e, "failed to acknowledge");
                    break;
                }
                acknowledged += 1;
            }
            Ok(None) => {
                info!(%peer, "client disconnected");
                break;
            }
            Err(e) if e.is_authentication_failure() => {
                warn!(%peer, "dropped frame that failed authentication");
            }
            Err(Error::Timeout) => {
                info!(%peer, "session idle, closing");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "session ended");
                break;
            }
        }
    }
    if let Err(e) = channel.close().await {
        warn!(%peer, error = %e, "close failed");
    }
    acknowledged
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use ecwire_core::test_channel_pair;
    use ecwire_crypto::KeySchedule;
    use tokio::io::BufReader;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[tokio::test]
    async fn client_sends_lines_and_prints_acks() {
        let (server, mut client) = test_channel_pair(KeySchedule::Directional).unwrap();
        let session = tokio::spawn(serve_session(server, loopback(), None));

        let input = BufReader::new(&b"hello\n\nsecond line\nEXIT\nnever sent\n"[..]);
        let mut output = Vec::new();
        let exit = run_client(&mut client, input, &mut output).await.unwrap();
        assert_eq!(exit, ClientExit::UserQuit);
        client.close().await.unwrap();

        assert_eq!(session.await.unwrap(), 2);
        let printed = String::from_utf8(output).unwrap();
        assert_eq!(printed.matches("Server reply: Message received").count(), 2);
        assert!(printed.starts_with(PROMPT));
    }

    #[tokio::test]
    async fn exit_is_case_insensitive_and_trimmed() {
        let (_server, mut client) = test_channel_pair(KeySchedule::Directional).unwrap();
        let input = BufReader::new(&b"  ExIt  \n"[..]);
        let exit = run_client(&mut client, input, Vec::new()).await.unwrap();
        assert_eq!(exit, ClientExit::UserQuit);
    }

    #[tokio::test]
    async fn end_of_input_ends_client() {
        let (_server, mut client) = test_channel_pair(KeySchedule::Directional).unwrap();
        let exit = run_client(&mut client, BufReader::new(&b""[..]), Vec::new())
            .await
            .unwrap();
        assert_eq!(exit, ClientExit::InputClosed);
    }

    #[tokio::test]
    async fn client_notices_server_hangup() {
        let (server, mut client) = test_channel_pair(KeySchedule::Directional).unwrap();
        let hangup = tokio::spawn(async move {
            let mut server = server;
            let first = server.receive().await.unwrap().unwrap();
            assert_eq!(first, b"bye");
            server.close().await.unwrap();
        });

        let mut output = Vec::new();
        let exit = run_client(&mut client, BufReader::new(&b"bye\n"[..]), &mut output)
            .await
            .unwrap();
        hangup.await.unwrap();
        assert_eq!(exit, ClientExit::PeerClosed);
        assert!(String::from_utf8(output).unwrap().contains("Server closed"));
    }

    #[tokio::test]
    async fn idle_session_is_closed() {
        let (server, _client) = test_channel_pair(KeySchedule::Directional).unwrap();
        let acked = serve_session(server, loopback(), Some(Duration::from_millis(50))).await;
        assert_eq!(acked, 0);
    }
}
