//! Configuration types and CLI/environment parsing for an edgelink server.
//!
//! Concrete deployments may have a more detailed config and can use the
//! exposed [`ServerConfig`] and flatten it with `#[clap(flatten)]`. All
//! defaults match programmatic construction via [`Default`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use edgelink_types::Address;
use secrecy::SecretString;

/// The configuration of an edgelink server.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`. Any interval set to zero disables the matching sweeper.
#[derive(Parser, Debug, Clone)]
pub struct ServerConfig {
    /// The port the listener binds to.
    #[clap(long, env = "EDGELINK_SERVER_PORT", default_value = "3793")]
    pub port: u16,

    /// Freshness window for handshake timestamps, and the deadline for raw
    /// sockets to upgrade and for upgraded sockets to authenticate.
    #[clap(
        long,
        env = "EDGELINK_SERVER_AUTH_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub auth_timeout: Duration,

    /// Tick of the pending-auth sweeper.
    #[clap(
        long,
        env = "EDGELINK_SERVER_AUTH_CHECK_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub auth_check_interval: Duration,

    /// Tick of the heartbeat sweeper. Every tick sends a control-frame ping
    /// and a heartbeat message to every authenticated peer.
    #[clap(
        long,
        env = "EDGELINK_SERVER_HEARTBEAT_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub heartbeat_interval: Duration,

    /// How long an authenticated peer may stay inactive before it is
    /// evicted.
    #[clap(
        long,
        env = "EDGELINK_SERVER_CLIENT_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub client_timeout: Duration,

    /// Tick of the idle-client sweeper.
    #[clap(
        long,
        env = "EDGELINK_SERVER_CLIENT_TIMEOUT_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub client_timeout_interval: Duration,

    /// Evict the existing peer when a new connection authenticates for an
    /// already-present address. When `false` the new connection is rejected
    /// instead.
    #[clap(
        long,
        env = "EDGELINK_SERVER_REPLACE_EXISTING",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub replace_existing: bool,

    /// Hex private key the server wallet is restored from. A fresh wallet
    /// is generated when absent.
    #[clap(long, env = "EDGELINK_SERVER_PRIVATE_KEY")]
    pub private_key: Option<SecretString>,

    /// Addresses allowed to authenticate. Everyone is allowed when empty.
    #[clap(long, env = "EDGELINK_SERVER_WHITELIST", value_delimiter = ',')]
    pub whitelist: Vec<Address>,

    /// PEM private key for TLS. TLS is active iff both `key` and `cert`
    /// are set.
    #[clap(long, env = "EDGELINK_SERVER_TLS_KEY")]
    pub key: Option<PathBuf>,

    /// PEM certificate chain for TLS.
    #[clap(long, env = "EDGELINK_SERVER_TLS_CERT")]
    pub cert: Option<PathBuf>,

    /// Max message size the websocket connection accepts.
    #[clap(
        long,
        env = "EDGELINK_SERVER_MAX_MESSAGE_SIZE",
        default_value = "65536"
    )]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3793,
            auth_timeout: Duration::from_millis(5000),
            auth_check_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(1000),
            client_timeout: Duration::from_millis(5000),
            client_timeout_interval: Duration::from_millis(1000),
            replace_existing: true,
            private_key: None,
            whitelist: Vec::new(),
            key: None,
            cert: None,
            max_message_size: 64 * 1024,
        }
    }
}
