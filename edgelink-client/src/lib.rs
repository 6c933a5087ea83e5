#![deny(missing_docs)]
//! The edgelink client: the initiating side of the authenticated WebSocket
//! session layer.
//!
//! The client dials a server, sends its `authenticate` message as soon as
//! the transport opens, verifies the server's counter-signature, and then
//! relays JSON application messages in both directions. Server heartbeats
//! are answered automatically. When the transport closes and `disconnect`
//! was not called, the client redials with linear backoff up to the
//! configured attempt cap.
//!
//! ```no_run
//! use edgelink_client::{Client, ClientConfig, ClientEvent};
//!
//! # async fn run() -> Result<(), edgelink_client::ClientError> {
//! let (client, mut events) = Client::new(ClientConfig::default())?;
//! client.connect();
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Authenticated(server) => {
//!             println!("authenticated against {server}");
//!             client.send(&serde_json::json!({ "type": "hello", "msg": "hi" }));
//!         }
//!         ClientEvent::Message(message) => println!("got {message}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use edgelink_types::wire::{Heartbeat, WireError};
use edgelink_types::{Address, Wallet, wallet::WalletError};
use parking_lot::Mutex;
use secrecy::ExposeSecret as _;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub mod config;
mod driver;

pub use config::{ClientConfig, Endpoint};
pub use tokio_tungstenite::Connector;
pub use tokio_tungstenite::tungstenite::http::uri::InvalidUri;

/// Errors surfaced by the client, either from [`Client::new`] or through
/// [`ClientEvent::Error`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server's `authenticate` signature did not verify against its
    /// claimed address. Terminal: the client will not reconnect.
    #[error("invalid server signature")]
    InvalidServerSignature,
    /// The configured attempt cap was reached with reconnection still
    /// wanted.
    #[error("max reconnect attempts reached")]
    ReconnectExhausted,
    /// The configured private key could not be restored.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// A received frame was not a well-formed wire message.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The server sent a reserved `error` message.
    #[error("server reported: {0}")]
    ServerReported(String),
    /// The endpoint does not form a valid URI.
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
    /// Transport-level failure.
    #[error(transparent)]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Everything the client reports to its owner.
#[derive(Debug)]
pub enum ClientEvent {
    /// The transport is open; the handshake is on its way.
    Connected,
    /// The mutual handshake completed; carries the server address.
    Authenticated(Address),
    /// An application message from the server.
    Message(Value),
    /// A heartbeat from the server; the reply was already sent.
    Heartbeat(Heartbeat),
    /// The transport closed.
    Disconnected,
    /// A redial was scheduled.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
        /// Delay before the redial.
        delay: Duration,
    },
    /// A client error; see [`ClientError`] for which ones are terminal.
    Error(ClientError),
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) should_reconnect: bool,
    pub(crate) reconnect_attempts: u32,
    pub(crate) connected: bool,
    pub(crate) authenticated: bool,
    pub(crate) server_address: Option<Address>,
    pub(crate) outbound: Option<mpsc::UnboundedSender<Message>>,
    pub(crate) cancel: Option<CancellationToken>,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) wallet: Wallet,
    pub(crate) connector: Option<Connector>,
    pub(crate) state: Mutex<State>,
    pub(crate) events: mpsc::UnboundedSender<ClientEvent>,
}

impl Shared {
    pub(crate) fn emit(&self, event: ClientEvent) {
        // the receiver may be gone
        let _ = self.events.send(event);
    }
}

/// Builder for a [`Client`], for when the plain [`Client::new`] is not
/// enough.
pub struct ClientBuilder {
    config: ClientConfig,
    wallet: Option<Wallet>,
    connector: Option<Connector>,
}

impl ClientBuilder {
    /// Creates a builder from the given config.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            wallet: None,
            connector: None,
        }
    }

    /// Uses this wallet instead of restoring or generating one.
    pub fn wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Uses a custom TLS connector, e.g. for private roots.
    pub fn connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the client and its event stream.
    pub fn build(self) -> Result<(Client, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let wallet = match self.wallet {
            Some(wallet) => wallet,
            None => match &self.config.private_key {
                Some(secret) => Wallet::from_private_key(secret.expose_secret())?,
                None => Wallet::generate(),
            },
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Client {
            shared: Arc::new(Shared {
                config: self.config,
                wallet,
                connector: self.connector,
                state: Mutex::new(State::default()),
                events: events_tx,
            }),
        };
        Ok((client, events_rx))
    }
}

/// Handle to the client. Cheap to clone; all methods are non-blocking.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Builds a client from `config` with a restored or generated wallet.
    pub fn new(
        config: ClientConfig,
    ) -> Result<(Client, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        ClientBuilder::new(config).build()
    }

    /// Dials the configured endpoint.
    ///
    /// Spawns the connection driver; completion is signaled by the
    /// [`ClientEvent::Connected`] and [`ClientEvent::Authenticated`]
    /// events. Calling this while a driver is live replaces it.
    pub fn connect(&self) {
        self.connect_to(self.shared.config.endpoint());
    }

    /// Dials `endpoint` instead of the configured one.
    pub fn connect_to(&self, endpoint: Endpoint) {
        let cancel = CancellationToken::new();
        {
            let mut state = self.shared.state.lock();
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
            }
            state.should_reconnect = true;
            state.reconnect_attempts = 0;
            state.cancel = Some(cancel.clone());
        }
        tokio::spawn(driver::run(Arc::clone(&self.shared), endpoint, cancel));
    }

    /// Closes the transport and stops all reconnection attempts.
    /// Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        state.should_reconnect = false;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
    }

    /// Serializes `message` and sends it iff the transport is open;
    /// silently drops it otherwise. Callers wanting guaranteed delivery
    /// must gate on [`ClientEvent::Authenticated`].
    pub fn send(&self, message: &Value) {
        let state = self.shared.state.lock();
        if !state.connected {
            tracing::trace!("dropping message, transport is not open");
            return;
        }
        if let Some(outbound) = &state.outbound {
            let _ = outbound.send(Message::text(message.to_string()));
        }
    }

    /// The client's own wallet address.
    pub fn address(&self) -> Address {
        self.shared.wallet.address()
    }

    /// The server's verified address, once authenticated.
    pub fn server_address(&self) -> Option<Address> {
        self.shared.state.lock().server_address
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Whether the mutual handshake has completed on this transport.
    pub fn is_authenticated(&self) -> bool {
        self.shared.state.lock().authenticated
    }
}
