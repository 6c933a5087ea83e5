use std::net::SocketAddr;
use std::time::Duration;

use edgelink_client::{Client, ClientConfig, ClientError, ClientEvent, Endpoint};
use edgelink_server::{Server, ServerBuilder, ServerConfig, ServerEvent};
use edgelink_types::wire::Authenticate;
use edgelink_types::{Envelope, Wallet};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn quiet_server_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        heartbeat_interval: Duration::ZERO,
        auth_check_interval: Duration::ZERO,
        client_timeout_interval: Duration::ZERO,
        ..ServerConfig::default()
    }
}

fn endpoint_for(server: &Server) -> Endpoint {
    Endpoint {
        host: "127.0.0.1".to_owned(),
        port: server.local_addr().port(),
        tls: false,
    }
}

fn fast_retry_config() -> ClientConfig {
    ClientConfig {
        max_reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

async fn next_client_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timely client event")
        .expect("client event stream open")
}

async fn next_server_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timely server event")
        .expect("server event stream open")
}

async fn assert_quiet(events: &mut UnboundedReceiver<ClientEvent>, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// A listener that accepts TCP connections and immediately drops them, so
/// every WebSocket handshake fails.
async fn refusing_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("can bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    addr
}

#[tokio::test]
async fn mutual_handshake_relays_messages() -> eyre::Result<()> {
    let (server, mut server_events) = ServerBuilder::new(quiet_server_config()).bind().await?;
    let (client, mut events) = Client::new(ClientConfig::default())?;

    client.connect_to(endpoint_for(&server));
    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Connected
    ));
    match next_client_event(&mut events).await {
        ClientEvent::Authenticated(address) => assert_eq!(address, server.address()),
        other => panic!("expected authenticated, got {other:?}"),
    }
    assert!(client.is_connected());
    assert!(client.is_authenticated());
    assert_eq!(client.server_address(), Some(server.address()));

    // client → server
    assert!(matches!(
        next_server_event(&mut server_events).await,
        ServerEvent::Authenticated(peer) if peer.address == client.address()
    ));
    client.send(&json!({ "type": "hello", "msg": "hi" }));
    assert!(matches!(
        next_server_event(&mut server_events).await,
        ServerEvent::Message { message, .. } if message == json!({ "type": "hello", "msg": "hi" })
    ));

    // server → client
    server.send(&client.address(), &json!({ "type": "news", "n": 1 }))?;
    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Message(message) if message == json!({ "type": "news", "n": 1 })
    ));

    client.disconnect();
    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Disconnected
    ));
    // no reconnection after an explicit disconnect
    assert_quiet(&mut events, Duration::from_millis(300)).await;

    server.close();
    Ok(())
}

#[tokio::test]
async fn client_answers_server_heartbeats() -> eyre::Result<()> {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..quiet_server_config()
    };
    let (server, mut server_events) = ServerBuilder::new(config).bind().await?;
    let (client, mut events) = Client::new(ClientConfig::default())?;

    client.connect_to(endpoint_for(&server));
    loop {
        if matches!(
            next_client_event(&mut events).await,
            ClientEvent::Heartbeat(_)
        ) {
            break;
        }
    }
    // the automatic reply reaches the server as a heartbeat, not a message
    loop {
        match next_server_event(&mut server_events).await {
            ServerEvent::Heartbeat { peer, .. } => {
                assert_eq!(peer.address, client.address());
                break;
            }
            ServerEvent::Authenticated(_) => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    client.disconnect();
    server.close();
    Ok(())
}

#[tokio::test]
async fn reconnects_with_linear_backoff_until_exhausted() -> eyre::Result<()> {
    let addr = refusing_listener().await;
    let (client, mut events) = Client::new(fast_retry_config())?;

    client.connect_to(Endpoint {
        host: "127.0.0.1".to_owned(),
        port: addr.port(),
        tls: false,
    });

    let mut schedule = Vec::new();
    loop {
        match next_client_event(&mut events).await {
            ClientEvent::Reconnecting { attempt, delay } => schedule.push((attempt, delay)),
            ClientEvent::Error(ClientError::ReconnectExhausted) => break,
            ClientEvent::Error(ClientError::Ws(_)) => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(
        schedule,
        [
            (1, Duration::from_millis(50)),
            (2, Duration::from_millis(100)),
            (3, Duration::from_millis(150)),
        ]
    );
    // no further dial after the cap
    assert_quiet(&mut events, Duration::from_millis(300)).await;
    Ok(())
}

#[tokio::test]
async fn disconnect_cancels_scheduled_reconnection() -> eyre::Result<()> {
    let addr = refusing_listener().await;
    let config = ClientConfig {
        max_reconnect_attempts: 100,
        reconnect_delay: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    let (client, mut events) = Client::new(config)?;

    client.connect_to(Endpoint {
        host: "127.0.0.1".to_owned(),
        port: addr.port(),
        tls: false,
    });
    loop {
        if matches!(
            next_client_event(&mut events).await,
            ClientEvent::Reconnecting { .. }
        ) {
            break;
        }
    }

    client.disconnect();
    client.disconnect();
    assert_quiet(&mut events, Duration::from_millis(500)).await;
    Ok(())
}

#[tokio::test]
async fn invalid_server_signature_is_terminal() -> eyre::Result<()> {
    // a server whose authenticate reply is signed over the wrong message
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
                // swallow the client handshake
                let _ = ws.next().await;
                let impostor = Wallet::generate();
                let forged = Authenticate {
                    address: impostor.address(),
                    timestamp: edgelink_types::now_ms(),
                    signature: impostor.sign("999").to_string(),
                };
                let reply = Envelope::Authenticate(forged).to_text();
                let _ = ws.send(Message::text(reply)).await;
                // keep the socket open; the client must hang up on us
                let _ = ws.next().await;
            });
        }
    });

    let (client, mut events) = Client::new(fast_retry_config())?;
    client.connect_to(Endpoint {
        host: "127.0.0.1".to_owned(),
        port: addr.port(),
        tls: false,
    });

    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Connected
    ));
    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Error(ClientError::InvalidServerSignature)
    ));
    assert!(matches!(
        next_client_event(&mut events).await,
        ClientEvent::Disconnected
    ));
    // terminal: no reconnection against an impostor
    assert_quiet(&mut events, Duration::from_millis(300)).await;
    assert!(!client.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn server_disconnect_request_restarts_the_session() -> eyre::Result<()> {
    let (server, mut server_events) = ServerBuilder::new(quiet_server_config()).bind().await?;
    let config = ClientConfig {
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let (client, mut events) = Client::new(config)?;
    client.connect_to(endpoint_for(&server));

    for round in 0..2 {
        assert!(matches!(
            next_client_event(&mut events).await,
            ClientEvent::Connected
        ));
        assert!(matches!(
            next_client_event(&mut events).await,
            ClientEvent::Authenticated(_)
        ));
        loop {
            if matches!(
                next_server_event(&mut server_events).await,
                ServerEvent::Authenticated(_)
            ) {
                break;
            }
        }

        server.send(&client.address(), &json!({ "type": "disconnect" }))?;
        assert!(matches!(
            next_client_event(&mut events).await,
            ClientEvent::Disconnected
        ));
        // the attempt counter was reset by the successful connection
        match next_client_event(&mut events).await {
            ClientEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt, 1, "round {round}");
                assert_eq!(delay, Duration::from_millis(50));
            }
            other => panic!("expected reconnecting, got {other:?}"),
        }
    }

    client.disconnect();
    server.close();
    Ok(())
}

#[tokio::test]
async fn send_without_a_transport_is_dropped() -> eyre::Result<()> {
    let (client, mut events) = Client::new(ClientConfig::default())?;
    assert!(!client.is_connected());
    client.send(&json!({ "type": "void" }));
    assert_quiet(&mut events, Duration::from_millis(200)).await;
    Ok(())
}
