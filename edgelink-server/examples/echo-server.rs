//! A minimal edgelink server that echoes every user message back to its
//! sender.
//!
//! ```sh
//! cargo run --example echo-server -- --port 3793
//! ```

use clap::Parser;
use edgelink_server::{ServerBuilder, ServerConfig, ServerEvent};
use eyre::Context as _;

/// The configuration for the echo server.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
struct EchoServerConfig {
    #[clap(flatten)]
    server: ServerConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let config = EchoServerConfig::parse();

    let (server, mut events) = ServerBuilder::new(config.server)
        .bind()
        .await
        .context("while starting the echo server")?;
    tracing::info!(
        "echo server listening on {} as {}",
        server.local_addr(),
        server.address()
    );

    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Authenticated(peer) => tracing::info!("welcome {}", peer.address),
            ServerEvent::Message { peer, message } => {
                tracing::info!("echoing {message} back to {}", peer.address);
                server.send(&peer.address, &message)?;
            }
            ServerEvent::Disconnected(peer) => tracing::info!("goodbye {}", peer.address),
            ServerEvent::Error(err) => tracing::warn!("{err}"),
            ServerEvent::Heartbeat { .. } => {}
            ServerEvent::Closed => break,
        }
    }
    Ok(())
}
