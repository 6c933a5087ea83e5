#![deny(missing_docs)]
//! The edgelink server: a cryptographically authenticated session layer
//! over WebSocket.
//!
//! Every accepted connection has to complete a signature-based handshake
//! before it becomes a long-lived authenticated session. The server tracks
//! at most one authenticated peer per wallet address, enforces liveness via
//! heartbeats and activity timeouts, and surfaces everything that happens
//! through a typed event stream.
//!
//! The main entry point is the [`ServerBuilder`]:
//!
//! ```no_run
//! use edgelink_server::{ServerBuilder, ServerConfig, ServerEvent};
//!
//! # async fn run() -> eyre::Result<()> {
//! let (server, mut events) = ServerBuilder::new(ServerConfig::default())
//!     .bind()
//!     .await?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ServerEvent::Message { peer, message } => {
//!             server.send(&peer.address, &message)?;
//!         }
//!         ServerEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Closing the server cancels all sweepers and connection tasks; `close` is
//! idempotent. Per-connection protocol errors never take the server down,
//! they terminate the affected connection and surface as
//! [`ServerEvent::Error`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use edgelink_types::wire::Heartbeat;
use edgelink_types::{Address, Wallet};
use eyre::Context as _;
use secrecy::ExposeSecret as _;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod connection;
pub mod config;
mod error;
pub mod metrics;
mod peer;
mod registry;
mod sweeper;
mod tls;

pub use config::ServerConfig;
pub use error::ServerError;
pub use peer::PeerInfo;

use registry::Registry;

/// The synchronous authentication predicate run after the whitelist check.
pub type AuthPredicate = Arc<dyn Fn(&Address) -> bool + Send + Sync>;

/// Everything the server reports to its owner.
///
/// `Authenticated` precedes any `Message` or `Heartbeat` for a peer, and
/// `Disconnected` is the last event emitted for a peer.
#[derive(Debug)]
pub enum ServerEvent {
    /// A connection completed the handshake.
    Authenticated(PeerInfo),
    /// An application message from an authenticated peer.
    Message {
        /// Sending peer.
        peer: PeerInfo,
        /// The JSON payload, verbatim.
        message: Value,
    },
    /// A heartbeat from an authenticated peer.
    Heartbeat {
        /// Sending peer.
        peer: PeerInfo,
        /// The received heartbeat.
        message: Heartbeat,
    },
    /// A peer went away; always the last event for that peer.
    Disconnected(PeerInfo),
    /// A per-connection error. The server keeps running.
    Error(ServerError),
    /// The server was closed.
    Closed,
}

pub(crate) struct Inner {
    pub(crate) config: ServerConfig,
    pub(crate) wallet: Wallet,
    pub(crate) whitelist: Option<HashSet<Address>>,
    pub(crate) authenticator: Option<AuthPredicate>,
    pub(crate) registry: Registry,
    pub(crate) events: mpsc::UnboundedSender<ServerEvent>,
    pub(crate) cancel: CancellationToken,
}

impl Inner {
    pub(crate) fn emit(&self, event: ServerEvent) {
        // the receiver may be gone during shutdown
        let _ = self.events.send(event);
    }
}

/// Builder for a [`Server`].
///
/// The wallet resolution order is: explicit [`ServerBuilder::wallet`], the
/// configured private key, a freshly generated wallet.
pub struct ServerBuilder {
    config: ServerConfig,
    wallet: Option<Wallet>,
    authenticator: Option<AuthPredicate>,
}

impl ServerBuilder {
    /// Creates a builder from the given config.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            wallet: None,
            authenticator: None,
        }
    }

    /// Uses this wallet instead of restoring or generating one.
    pub fn wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Installs a custom authentication predicate.
    ///
    /// It runs after the whitelist check and before the freshness check,
    /// and must be pure and fast; it is called on the connection task.
    pub fn on_authenticate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Address) -> bool + Send + Sync + 'static,
    {
        self.authenticator = Some(Arc::new(predicate));
        self
    }

    /// Binds the listener and starts serving.
    ///
    /// TLS is active iff both `key` and `cert` are configured. Returns the
    /// server handle and the event stream. Fails if the port cannot be
    /// bound or the TLS material cannot be loaded.
    pub async fn bind(self) -> eyre::Result<(Server, mpsc::UnboundedReceiver<ServerEvent>)> {
        let wallet = match self.wallet {
            Some(wallet) => wallet,
            None => match &self.config.private_key {
                Some(secret) => Wallet::from_private_key(secret.expose_secret())
                    .context("while restoring the server wallet")?,
                None => Wallet::generate(),
            },
        };

        let acceptor = match (&self.config.key, &self.config.cert) {
            (Some(key), Some(cert)) => {
                Some(tls::load_acceptor(key, cert).context("while loading TLS material")?)
            }
            _ => None,
        };

        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .with_context(|| format!("while binding port {}", self.config.port))?;
        let local_addr = listener.local_addr().context("while reading local addr")?;

        let whitelist = if self.config.whitelist.is_empty() {
            None
        } else {
            Some(self.config.whitelist.iter().copied().collect())
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config: self.config,
            wallet,
            whitelist,
            authenticator: self.authenticator,
            registry: Registry::default(),
            events: events_tx,
            cancel: CancellationToken::new(),
        });

        tracing::info!(
            %local_addr,
            tls = acceptor.is_some(),
            address = %inner.wallet.address(),
            "listening"
        );
        tokio::spawn(connection::accept_loop(
            Arc::clone(&inner),
            listener,
            acceptor,
        ));
        sweeper::spawn_all(&inner);

        Ok((Server { inner, local_addr }, events_rx))
    }
}

/// Handle to a running server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
    local_addr: SocketAddr,
}

impl Server {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The wallet address of this server.
    pub fn address(&self) -> Address {
        self.inner.wallet.address()
    }

    /// Snapshot of the currently authenticated peers.
    pub fn clients(&self) -> Vec<PeerInfo> {
        self.inner
            .registry
            .clients_snapshot()
            .into_iter()
            .map(|peer| peer.info())
            .collect()
    }

    /// The authenticated peer for `address`, if present.
    pub fn client(&self, address: &Address) -> Option<PeerInfo> {
        self.inner
            .registry
            .client(address)
            .map(|peer| peer.info())
    }

    /// Serializes `message` and sends it to the named peer.
    pub fn send(&self, address: &Address, message: &Value) -> Result<(), ServerError> {
        self.inner
            .registry
            .client(address)
            .ok_or(ServerError::UnknownClient(*address))?
            .send_value(message)
    }

    /// Sends `message` to every authenticated peer, best-effort. Returns
    /// how many peers it reached.
    pub fn broadcast(&self, message: &Value) -> usize {
        let text = message.to_string();
        self.inner
            .registry
            .clients_snapshot()
            .into_iter()
            .filter(|peer| peer.send_text(text.clone()).is_ok())
            .count()
    }

    /// Stops all sweepers, aborts every live and pending connection, and
    /// emits [`ServerEvent::Closed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        for peer in self.inner.registry.clear() {
            peer.shutdown();
        }
        self.inner.emit(ServerEvent::Closed);
        tracing::info!("server closed");
    }
}
