//! Bookkeeping for an authenticated counterparty.
//!
//! A [`Peer`] is a thin handle over the connection's outbound channel: it
//! never touches the socket directly. The connection task owns the writer;
//! everything else (sweepers, the send API, replacement) talks to it
//! through the handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use edgelink_types::Address;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServerError;

/// Public identity of an authenticated peer.
///
/// `id` is freshly minted per connection so successive sessions for the
/// same address can be told apart in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Opaque unique id of this connection.
    pub id: Uuid,
    /// The peer wallet address.
    pub address: Address,
}

/// Handle to a live authenticated connection.
#[derive(Clone)]
pub(crate) struct Peer {
    info: PeerInfo,
    outbound: mpsc::UnboundedSender<Message>,
    last_active: Arc<Mutex<Instant>>,
    cancel: CancellationToken,
}

impl Peer {
    pub(crate) fn new(
        id: Uuid,
        address: Address,
        outbound: mpsc::UnboundedSender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            info: PeerInfo { id, address },
            outbound,
            last_active: Arc::new(Mutex::new(Instant::now())),
            cancel,
        }
    }

    pub(crate) fn info(&self) -> PeerInfo {
        self.info
    }

    pub(crate) fn address(&self) -> Address {
        self.info.address
    }

    pub(crate) fn id(&self) -> Uuid {
        self.info.id
    }

    /// Serializes `value` and enqueues it as a text frame.
    pub(crate) fn send_value(&self, value: &Value) -> Result<(), ServerError> {
        self.send_text(value.to_string())
    }

    pub(crate) fn send_text(&self, text: String) -> Result<(), ServerError> {
        self.outbound
            .send(Message::text(text))
            .map_err(|_| ServerError::ConnectionClosed)
    }

    /// Enqueues a control-frame ping.
    pub(crate) fn ping(&self) {
        let _ = self.outbound.send(Message::Ping(Bytes::new()));
    }

    /// Marks the peer as active now.
    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Time since the last observed activity.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Rejects or evicts the peer: writes the advisory status line and the
    /// close frame for `error`, then cancels the connection task.
    pub(crate) fn close_with(&self, error: &ServerError) {
        if let Some(line) = error.advisory_line() {
            let _ = self.outbound.send(Message::text(line));
        }
        let _ = self.outbound.send(Message::Close(error.close_frame()));
        self.cancel.cancel();
    }

    /// Gracefully shuts the peer down without an error.
    pub(crate) fn shutdown(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.cancel.cancel();
    }
}
