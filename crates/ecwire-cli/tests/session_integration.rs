#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Client prompt loop against the acknowledging server over real TCP.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::Mutex;

use ecwire_cli::session::{self, ClientExit, PROMPT};
use ecwire_core::{ChannelServer, Config};

#[tokio::test]
async fn client_and_server_talk_over_tcp() {
    let mut config = Config::default();
    config.network.addr = "127.0.0.1:0".to_string();
    config.channel.idle_timeout_secs = 5;

    let server = ChannelServer::bind(config.network.addr.as_str(), config.handshake_settings())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let counts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&counts);
    let idle = config.idle_timeout();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    let serving = tokio::spawn(server.serve(
        move |channel, peer| {
            let recorded = Arc::clone(&recorded);
            let done_tx = done_tx.clone();
            async move {
                let acked = session::serve_session(channel, peer, idle).await;
                recorded.lock().await.push(acked);
                let _ = done_tx.send(());
            }
        },
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut channel = ecwire_core::connect(addr, &config.handshake_settings())
        .await
        .unwrap();
    let input = BufReader::new(&b"first\nsecond\nthird\nexit\n"[..]);
    let mut output = Vec::new();
    let exit = session::run_client(&mut channel, input, &mut output)
        .await
        .unwrap();
    assert_eq!(exit, ClientExit::UserQuit);
    channel.close().await.unwrap();

    done_rx.recv().await.unwrap();
    assert_eq!(*counts.lock().await, vec![3]);

    let printed = String::from_utf8(output).unwrap();
    assert_eq!(printed.matches(PROMPT).count(), 4);
    assert_eq!(printed.matches("Server reply: Message received").count(), 3);

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();
}
