//! Per-connection driver.
//!
//! Every accepted socket moves through the connection state machine: raw
//! socket → (TLS accept) → WebSocket upgrade → pending authentication →
//! authenticated peer. The raw and upgrading stages are bounded by the auth
//! timeout; the pending stage is additionally watched by the auth sweeper.
//! The first frame must be a valid `authenticate` message; anything else
//! terminates the connection.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use edgelink_types::wire::Authenticate;
use edgelink_types::{Envelope, now_ms};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServerError;
use crate::metrics::{
    METRICS_ID_SERVER_AUTH_ACCEPTED, METRICS_ID_SERVER_AUTH_REJECTED,
    METRICS_ID_SERVER_CLIENTS_REPLACED,
};
use crate::peer::Peer;
use crate::{Inner, ServerEvent};

/// The lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Raw,
    Upgrading,
    PendingAuth,
    Authenticated,
    Closed,
}

/// Accepts raw sockets until the server is closed. Each socket gets its own
/// task; a failing accept never takes down the listener.
pub(crate) async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tokio::spawn(serve(Arc::clone(&inner), stream, remote, acceptor.clone()));
                }
                Err(err) => {
                    tracing::warn!("accept failed: {err}");
                }
            }
        }
    }
}

/// Drives one accepted socket through TLS accept (if configured) and the
/// WebSocket upgrade, both bounded by the auth timeout.
async fn serve(
    inner: Arc<Inner>,
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: Option<TlsAcceptor>,
) {
    tracing::trace!(%remote, state = ?ConnectionState::Raw, "accepted");
    match acceptor {
        Some(acceptor) => {
            match tokio::time::timeout(inner.config.auth_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => upgrade(inner, tls_stream, remote).await,
                Ok(Err(err)) => tracing::debug!(%remote, "TLS accept failed: {err}"),
                Err(_) => tracing::debug!(%remote, "TLS accept deadline exceeded"),
            }
        }
        None => upgrade(inner, stream, remote).await,
    }
}

async fn upgrade<S>(inner: Arc<Inner>, stream: S, remote: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracing::trace!(%remote, state = ?ConnectionState::Upgrading, "upgrading");
    let ws_config = WebSocketConfig::default().max_message_size(Some(inner.config.max_message_size));
    let upgraded = tokio::time::timeout(
        inner.config.auth_timeout,
        tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)),
    )
    .await;
    match upgraded {
        Ok(Ok(ws)) => drive(inner, ws, remote).await,
        Ok(Err(err)) => tracing::debug!(%remote, "websocket upgrade failed: {err}"),
        Err(_) => tracing::debug!(%remote, "websocket upgrade deadline exceeded"),
    }
}

/// Outcome of the pre-auth gate.
enum PreAuth {
    Accepted(Authenticate),
    Rejected(ServerError),
    /// Peer went away (close frame, transport error) or the server is
    /// shutting down; close without an event.
    Gone,
}

async fn drive<S>(inner: Arc<Inner>, ws: WebSocketStream<S>, remote: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut state = ConnectionState::PendingAuth;
    let (sink, mut stream) = ws.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));

    let conn_id = Uuid::new_v4();
    let cancel = inner.cancel.child_token();
    let _pending = inner.registry.insert_pending(conn_id, cancel.clone());
    tracing::trace!(%remote, id = %conn_id, ?state, "awaiting authenticate");

    let auth = match await_authenticate(&inner, &mut stream, &cancel).await {
        PreAuth::Accepted(auth) => auth,
        PreAuth::Rejected(error) => {
            reject(&inner, &outbound, error);
            return finish_writer(outbound, writer).await;
        }
        PreAuth::Gone => {
            return finish_writer(outbound, writer).await;
        }
    };

    let peer = Peer::new(conn_id, auth.address, outbound.clone(), cancel.clone());
    match inner
        .registry
        .promote(conn_id, peer.clone(), inner.config.replace_existing)
    {
        Ok(None) => {}
        Ok(Some(existing)) => {
            let error = ServerError::ClientReplaced(auth.address);
            tracing::debug!(peer = %auth.address, evicted = %existing.id(), "replacing existing peer");
            existing.close_with(&error);
            ::metrics::counter!(METRICS_ID_SERVER_CLIENTS_REPLACED).increment(1);
            inner.emit(ServerEvent::Error(error));
        }
        Err(error) => {
            drop(peer);
            reject(&inner, &outbound, error);
            return finish_writer(outbound, writer).await;
        }
    }

    state = ConnectionState::Authenticated;
    let response = Envelope::Authenticate(Authenticate::signed(&inner.wallet, now_ms()));
    let _ = peer.send_text(response.to_text());
    ::metrics::counter!(METRICS_ID_SERVER_AUTH_ACCEPTED).increment(1);
    tracing::debug!(peer = %auth.address, id = %conn_id, ?state, "peer authenticated");
    inner.emit(ServerEvent::Authenticated(peer.info()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Err(err)) => {
                    tracing::trace!(peer = %auth.address, "transport error: {err}");
                    if !crate::error::is_benign_disconnect(&err) {
                        inner.emit(ServerEvent::Error(ServerError::Transport(err)));
                    }
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    if on_message(&inner, &peer, text.as_str()).is_break() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => peer.touch(),
                // pings are answered by the transport and do not count as activity
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    inner.emit(ServerEvent::Error(ServerError::UnexpectedBinary(auth.address)));
                }
                Some(Ok(Message::Frame(_))) => {}
            }
        }
    }

    state = ConnectionState::Closed;
    let info = peer.info();
    inner.registry.remove_client_if(&info.address, conn_id);
    drop(peer);
    tracing::debug!(peer = %info.address, id = %conn_id, ?state, "peer disconnected");
    inner.emit(ServerEvent::Disconnected(info));
    finish_writer(outbound, writer).await;
}

/// Waits for the first application frame and runs the authentication gate
/// over it. Control frames are let through; everything else settles the
/// connection's fate.
async fn await_authenticate<S>(
    inner: &Inner,
    stream: &mut SplitStream<WebSocketStream<S>>,
    cancel: &CancellationToken,
) -> PreAuth
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return if inner.cancel.is_cancelled() {
                    PreAuth::Gone
                } else {
                    // the auth sweeper gave up on us
                    PreAuth::Rejected(ServerError::PendingAuthExpired)
                };
            }
            frame = stream.next() => match frame {
                None | Some(Ok(Message::Close(_))) => return PreAuth::Gone,
                Some(Err(err)) => {
                    tracing::trace!("pre-auth transport error: {err}");
                    return PreAuth::Gone;
                }
                Some(Ok(Message::Text(text))) => return validate(inner, text.as_str()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    return PreAuth::Rejected(ServerError::InvalidPreAuthMessage);
                }
            }
        }
    }
}

/// The authentication gate: message shape, whitelist, custom predicate,
/// freshness, signature, in that order.
fn validate(inner: &Inner, text: &str) -> PreAuth {
    let envelope = match Envelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(err) => return PreAuth::Rejected(err.into()),
    };
    let Envelope::Authenticate(auth) = envelope else {
        return PreAuth::Rejected(ServerError::InvalidPreAuthMessage);
    };
    if let Some(whitelist) = &inner.whitelist
        && !whitelist.contains(&auth.address)
    {
        return PreAuth::Rejected(ServerError::NotWhitelisted(auth.address));
    }
    if let Some(predicate) = &inner.authenticator
        && !predicate(&auth.address)
    {
        return PreAuth::Rejected(ServerError::AuthenticationFailed(auth.address));
    }
    let skew = now_ms().abs_diff(auth.timestamp);
    if skew >= inner.config.auth_timeout.as_millis() as u64 {
        return PreAuth::Rejected(ServerError::AuthenticationTimeout(auth.address));
    }
    if !auth.verify() {
        return PreAuth::Rejected(ServerError::InvalidSignature(auth.address));
    }
    PreAuth::Accepted(auth)
}

/// One authenticated inbound text frame. Breaks the read loop for protocol
/// violations and graceful close requests.
fn on_message(inner: &Inner, peer: &Peer, text: &str) -> ControlFlow<()> {
    let envelope = match Envelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            // malformed frames are discarded, the connection survives
            inner.emit(ServerEvent::Error(err.into()));
            return ControlFlow::Continue(());
        }
    };
    peer.touch();
    match envelope {
        Envelope::Heartbeat(heartbeat) => {
            inner.emit(ServerEvent::Heartbeat {
                peer: peer.info(),
                message: heartbeat,
            });
            ControlFlow::Continue(())
        }
        Envelope::Authenticate(_) => {
            let error = ServerError::UnexpectedAuthenticate(peer.address());
            peer.close_with(&error);
            inner.emit(ServerEvent::Error(error));
            ControlFlow::Break(())
        }
        Envelope::Disconnect => ControlFlow::Break(()),
        Envelope::Error(value) => {
            inner.emit(ServerEvent::Error(ServerError::PeerReported(
                peer.address(),
                value.to_string(),
            )));
            ControlFlow::Continue(())
        }
        Envelope::User(value) => {
            inner.emit(ServerEvent::Message {
                peer: peer.info(),
                message: value,
            });
            ControlFlow::Continue(())
        }
    }
}

/// Writes the advisory status line and close frame for `error` and
/// surfaces it as an event.
fn reject(inner: &Inner, outbound: &mpsc::UnboundedSender<Message>, error: ServerError) {
    tracing::debug!("rejecting connection: {error}");
    if let Some(line) = error.advisory_line() {
        let _ = outbound.send(Message::text(line));
    }
    let _ = outbound.send(Message::Close(error.close_frame()));
    ::metrics::counter!(METRICS_ID_SERVER_AUTH_REJECTED).increment(1);
    inner.emit(ServerEvent::Error(error));
}

/// Drains and flushes the writer. All other senders must be gone by the
/// time this is called, otherwise the writer keeps running.
async fn finish_writer(outbound: mpsc::UnboundedSender<Message>, writer: JoinHandle<()>) {
    drop(outbound);
    let _ = writer.await;
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    // closing handshake on a best-effort basis
    let _ = sink.close().await;
}
