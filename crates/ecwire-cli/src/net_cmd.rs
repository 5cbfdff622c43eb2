//! `ecwire serve` and `ecwire connect`.

use std::future::Future;

use anyhow::{Context, Result};
use ecwire_core::{ChannelServer, Config};
use tokio::io::BufReader;
use tracing::info;

use crate::session::{self, ClientExit};

/// Run the acknowledging server until `shutdown` resolves.
pub async fn run_serve<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let settings = config.handshake_settings();
    let idle = config.idle_timeout();
    let server = ChannelServer::bind(config.network.addr.as_str(), settings)
        .await
        .with_context(|| format!("Failed to bind {}", config.network.addr))?
        .with_max_connections(config.network.max_connections);

    server
        .serve(
            move |channel, peer| async move {
                info!(%peer, "secure session started");
                let acknowledged = session::serve_session(channel, peer, idle).await;
                info!(%peer, acknowledged, "secure session finished");
            },
            shutdown,
        )
        .await?;
    Ok(())
}

/// Connect, then relay stdin lines until the user quits.
pub async fn run_connect(config: &Config) -> Result<()> {
    let settings = config.handshake_settings();
    let mut channel = ecwire_core::connect(config.network.addr.as_str(), &settings)
        .await
        .with_context(|| format!("Failed to connect to {}", config.network.addr))?;

    if let Some(peer) = channel.peer_public() {
        info!(fingerprint = %peer.fingerprint(), "server key");
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let exit = session::run_client(&mut channel, stdin, tokio::io::stdout()).await?;
    info!(?exit, "client session finished");

    if exit != ClientExit::PeerClosed {
        channel.close().await.context("Failed to close channel")?;
    }
    Ok(())
}
