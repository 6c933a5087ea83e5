//! Configuration types and CLI/environment parsing for an edgelink client.

use std::fmt;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

/// The configuration of an edgelink client.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`. All defaults match programmatic construction via
/// [`Default`].
#[derive(Parser, Debug, Clone)]
pub struct ClientConfig {
    /// Host of the server to dial.
    #[clap(long, env = "EDGELINK_CLIENT_HOST", default_value = "localhost")]
    pub host: String,

    /// Port of the server to dial.
    #[clap(long, env = "EDGELINK_CLIENT_PORT", default_value = "3793")]
    pub port: u16,

    /// Dial `wss://` instead of `ws://`.
    #[clap(long, env = "EDGELINK_CLIENT_TLS")]
    pub tls: bool,

    /// How often to redial after the transport closes before giving up.
    #[clap(
        long,
        env = "EDGELINK_CLIENT_MAX_RECONNECT_ATTEMPTS",
        default_value = "5"
    )]
    pub max_reconnect_attempts: u32,

    /// Base delay between redials; attempt `n` waits `n` times this long.
    #[clap(
        long,
        env = "EDGELINK_CLIENT_RECONNECT_DELAY",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub reconnect_delay: Duration,

    /// Hex private key the client wallet is restored from. A fresh wallet
    /// is generated when absent.
    #[clap(long, env = "EDGELINK_CLIENT_PRIVATE_KEY")]
    pub private_key: Option<SecretString>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 3793,
            tls: false,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            private_key: None,
        }
    }
}

impl ClientConfig {
    /// The endpoint described by this config.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
        }
    }
}

/// A dialable server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether to dial `wss://`.
    pub tls: bool,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "wss" } else { "ws" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}
