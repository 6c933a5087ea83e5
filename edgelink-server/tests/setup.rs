//! Shared fixtures for the server test suite: servers with short timers and
//! a raw tungstenite counterparty.

use std::net::SocketAddr;
use std::time::Duration;

use edgelink_server::{Server, ServerBuilder, ServerConfig, ServerEvent};
use edgelink_types::wire::Authenticate;
use edgelink_types::{Envelope, Wallet, now_ms};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A config with test-friendly timers: sweepers off unless a test opts in.
pub fn quiet_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        heartbeat_interval: Duration::ZERO,
        auth_check_interval: Duration::ZERO,
        client_timeout_interval: Duration::ZERO,
        ..ServerConfig::default()
    }
}

pub async fn start(config: ServerConfig) -> eyre::Result<(Server, Events)> {
    start_with(config, |builder| builder).await
}

/// Like [`start`], with a hook to customize the builder (wallet, custom
/// authentication).
pub async fn start_with(
    config: ServerConfig,
    customize: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> eyre::Result<(Server, Events)> {
    let (server, events) = customize(ServerBuilder::new(config)).bind().await?;
    Ok((server, Events(events)))
}

/// Event stream wrapper that fails the test instead of hanging.
pub struct Events(pub UnboundedReceiver<ServerEvent>);

impl Events {
    pub async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(TEST_TIMEOUT, self.0.recv())
            .await
            .expect("timely event")
            .expect("event stream open")
    }

    /// The next `n` events, for assertions that tolerate either order.
    pub async fn take(&mut self, n: usize) -> Vec<ServerEvent> {
        let mut events = Vec::with_capacity(n);
        for _ in 0..n {
            events.push(self.next().await);
        }
        events
    }

}

pub async fn dial(addr: SocketAddr) -> Ws {
    // the server binds 0.0.0.0; dial loopback with the bound port
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}", addr.port()))
        .await
        .expect("can dial");
    ws
}

pub async fn send_text(ws: &mut Ws, text: impl Into<String>) {
    ws.send(Message::text(text.into())).await.expect("can send");
}

pub async fn send_json(ws: &mut Ws, value: &Value) {
    send_text(ws, value.to_string()).await;
}

/// Sends a fresh handshake for `wallet`.
pub async fn send_authenticate(ws: &mut Ws, wallet: &Wallet) {
    let auth = Envelope::Authenticate(Authenticate::signed(wallet, now_ms()));
    send_text(ws, auth.to_text()).await;
}

/// Next text frame, skipping control frames. `None` once the stream closed.
pub async fn recv_text(ws: &mut Ws) -> Option<String> {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("timely frame")?;
        match frame.ok()? {
            Message::Text(text) => return Some(text.to_string()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Reads frames until the server's `authenticate` reply, skipping
/// heartbeats, and checks its signature.
pub async fn expect_authenticate(ws: &mut Ws) -> Authenticate {
    loop {
        let text = recv_text(ws).await.expect("open stream");
        match Envelope::from_text(&text).expect("well-formed frame") {
            Envelope::Authenticate(auth) => {
                assert!(auth.verify(), "server signature must verify");
                return auth;
            }
            Envelope::Heartbeat(_) => continue,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}

/// Dials and completes the handshake for `wallet` in one go.
pub async fn connect_authenticated(server: &Server, wallet: &Wallet) -> Ws {
    let mut ws = dial(server.local_addr()).await;
    send_authenticate(&mut ws, wallet).await;
    let auth = expect_authenticate(&mut ws).await;
    assert_eq!(auth.address, server.address());
    ws
}

/// Drains the socket until it closes, returning the text frames seen.
pub async fn drain_until_close(ws: &mut Ws) -> Vec<String> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("timely close");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return seen,
            Some(Ok(Message::Text(text))) => seen.push(text.to_string()),
            Some(Ok(_)) => continue,
        }
    }
}
