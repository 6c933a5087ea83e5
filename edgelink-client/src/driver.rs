//! The connection driver task.
//!
//! One driver runs per `connect` call. It dials, performs the initiating
//! half of the handshake, relays messages, and redials with linear backoff
//! when the transport closes, until the attempt cap is hit, `disconnect`
//! clears the reconnect flag, or a newer `connect` call replaces it.

use std::ops::ControlFlow;
use std::sync::Arc;

use edgelink_types::wire::{Authenticate, Heartbeat};
use edgelink_types::{Envelope, now_ms};
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::{Message, http::Uri};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::Endpoint;
use crate::{ClientError, ClientEvent, Shared};

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) async fn run(shared: Arc<Shared>, endpoint: Endpoint, cancel: CancellationToken) {
    loop {
        if let Err(err) = session(&shared, &endpoint, &cancel).await {
            shared.emit(ClientEvent::Error(err));
        }

        enum Next {
            Stop,
            Exhausted,
            Retry(u32),
        }
        let next = {
            let mut state = shared.state.lock();
            if cancel.is_cancelled() || !state.should_reconnect {
                Next::Stop
            } else if state.reconnect_attempts >= shared.config.max_reconnect_attempts {
                Next::Exhausted
            } else {
                state.reconnect_attempts += 1;
                Next::Retry(state.reconnect_attempts)
            }
        };
        match next {
            Next::Stop => break,
            Next::Exhausted => {
                shared.emit(ClientEvent::Error(ClientError::ReconnectExhausted));
                break;
            }
            Next::Retry(attempt) => {
                let delay = shared.config.reconnect_delay * attempt;
                tracing::debug!(attempt, ?delay, "scheduling reconnect");
                shared.emit(ClientEvent::Reconnecting { attempt, delay });
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// One transport lifetime: dial, authenticate, relay until close.
async fn session(
    shared: &Arc<Shared>,
    endpoint: &Endpoint,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    let uri: Uri = endpoint.to_string().parse()?;
    let request = ClientRequestBuilder::new(uri);
    tracing::debug!(%endpoint, "dialing");

    let connect = tokio_tungstenite::connect_async_tls_with_config(
        request,
        None,
        false,
        shared.connector.clone(),
    );
    let (ws, _response): (WebSocket, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect => connected?,
    };

    let (sink, mut stream) = ws.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));

    // open handler: authenticate right away, reset the attempt counter
    let auth = Envelope::Authenticate(Authenticate::signed(&shared.wallet, now_ms()));
    let _ = outbound.send(Message::text(auth.to_text()));
    {
        let mut state = shared.state.lock();
        state.connected = true;
        state.reconnect_attempts = 0;
        state.outbound = Some(outbound.clone());
    }
    tracing::debug!(%endpoint, "transport open");
    shared.emit(ClientEvent::Connected);

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Err(err)) => {
                    result = Err(ClientError::Ws(err));
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    if on_message(shared, &outbound, text.as_str()).is_break() {
                        break;
                    }
                }
                // the transport answers pings on its own
                Some(Ok(_)) => {}
            }
        }
    }

    {
        let mut state = shared.state.lock();
        // a newer driver may already own the slot
        if state
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&outbound))
        {
            state.connected = false;
            state.authenticated = false;
            state.outbound = None;
        }
    }
    shared.emit(ClientEvent::Disconnected);
    drop(outbound);
    let _ = writer.await;
    result
}

fn on_message(
    shared: &Arc<Shared>,
    outbound: &mpsc::UnboundedSender<Message>,
    text: &str,
) -> ControlFlow<()> {
    let envelope = match Envelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            // malformed frames are discarded, the connection survives
            shared.emit(ClientEvent::Error(err.into()));
            return ControlFlow::Continue(());
        }
    };
    match envelope {
        Envelope::Authenticate(auth) => {
            if auth.verify() {
                {
                    let mut state = shared.state.lock();
                    state.authenticated = true;
                    state.server_address = Some(auth.address);
                }
                tracing::debug!(server = %auth.address, "mutually authenticated");
                shared.emit(ClientEvent::Authenticated(auth.address));
                ControlFlow::Continue(())
            } else {
                // never reconnect to an impostor
                shared.state.lock().should_reconnect = false;
                shared.emit(ClientEvent::Error(ClientError::InvalidServerSignature));
                ControlFlow::Break(())
            }
        }
        Envelope::Heartbeat(heartbeat) => {
            let reply = Envelope::Heartbeat(Heartbeat::now());
            let _ = outbound.send(Message::text(reply.to_text()));
            shared.emit(ClientEvent::Heartbeat(heartbeat));
            ControlFlow::Continue(())
        }
        Envelope::Disconnect => ControlFlow::Break(()),
        Envelope::Error(value) => {
            shared.emit(ClientEvent::Error(ClientError::ServerReported(
                value.to_string(),
            )));
            ControlFlow::Continue(())
        }
        Envelope::User(value) => {
            shared.emit(ClientEvent::Message(value));
            ControlFlow::Continue(())
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    // closing handshake on a best-effort basis
    let _ = sink.close().await;
}
