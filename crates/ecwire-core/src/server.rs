//! TCP listener that hands out established secure channels.
//!
//! Each accepted connection runs its own handshake on its own task, so a
//! slow or hostile peer never blocks the accept loop or other sessions.
//! A semaphore caps the number of live connections.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::channel::SecureChannel;
use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeSettings};

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener running the accepting side of the handshake.
pub struct ChannelServer {
    listener: TcpListener,
    settings: Arc<HandshakeSettings>,
    max_connections: usize,
}

impl ChannelServer {
    /// Bind a listening socket. Use port 0 for an ephemeral port.
    pub async fn bind<A: ToSocketAddrs>(addr: A, settings: HandshakeSettings) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            settings: Arc::new(settings),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and complete its handshake inline.
    pub async fn accept_one(&self) -> Result<(SecureChannel<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        configure(&stream);
        debug!(%peer, "connection accepted");
        let channel = handshake::accept(stream, &self.settings).await?;
        Ok((channel, peer))
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// `handler` receives every channel that completes its handshake.
    /// Handshake failures are logged and affect only that connection.
    /// In-flight sessions are aborted when the loop exits.
    pub async fn serve<H, Fut, S>(self, handler: H, shutdown: S) -> Result<()>
    where
        H: Fn(SecureChannel<TcpStream>, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, max_connections = self.max_connections, "listening");

        let handler = Arc::new(handler);
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    warn!(error = %e, "session task ended abnormally");
                }
            }

            let permit = tokio::select! {
                () = &mut shutdown => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            configure(&stream);
            debug!(%peer, "connection accepted");

            let settings = Arc::clone(&self.settings);
            let handler = Arc::clone(&handler);
            tasks.spawn(async move {
                let _permit = permit;
                match handshake::accept(stream, &settings).await {
                    Ok(channel) => handler(channel, peer).await,
                    Err(e) => debug!(%peer, error = %e, "dropping connection"),
                }
            });
        }

        info!(in_flight = tasks.len(), "shutting down");
        tasks.shutdown().await;
        Ok(())
    }
}

/// Connect to `addr` and run the initiating side of the handshake.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    settings: &HandshakeSettings,
) -> Result<SecureChannel<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    configure(&stream);
    let peer = stream.peer_addr().map_err(Error::Io)?;
    debug!(%peer, "connected");
    handshake::initiate(stream, settings).await
}

fn configure(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_one_and_connect_exchange_messages() {
        let server = ChannelServer::bind("127.0.0.1:0", HandshakeSettings::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut channel = connect(addr, &HandshakeSettings::default()).await.unwrap();
            channel.send(b"hello over tcp").await.unwrap();
            channel.receive().await.unwrap().unwrap()
        });

        let (mut channel, peer) = server.accept_one().await.unwrap();
        assert!(peer.ip().is_loopback());
        let got = channel.receive().await.unwrap().unwrap();
        assert_eq!(got, b"hello over tcp");
        channel.send(b"ack").await.unwrap();

        assert_eq!(client.await.unwrap(), b"ack");
    }

    #[tokio::test]
    async fn max_connections_is_at_least_one() {
        let server = ChannelServer::bind("127.0.0.1:0", HandshakeSettings::default())
            .await
            .unwrap()
            .with_max_connections(0);
        assert_eq!(server.max_connections, 1);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let server = ChannelServer::bind("127.0.0.1:0", HandshakeSettings::default())
            .await
            .unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(
            |_channel, _peer| async {},
            async move {
                let _ = rx.await;
            },
        ));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = connect(addr, &HandshakeSettings::default()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
