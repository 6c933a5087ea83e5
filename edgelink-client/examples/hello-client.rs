//! A minimal edgelink client: authenticates, says hello, and prints
//! everything the server sends.
//!
//! ```sh
//! cargo run --example hello-client -- --host localhost --port 3793
//! ```

use clap::Parser;
use edgelink_client::{Client, ClientConfig, ClientEvent};

/// The configuration for the hello client.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
struct HelloClientConfig {
    #[clap(flatten)]
    client: ClientConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let config = HelloClientConfig::parse();

    let (client, mut events) = Client::new(config.client)?;
    tracing::info!("dialing as {}", client.address());
    client.connect();

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Authenticated(server) => {
                tracing::info!("authenticated against {server}");
                client.send(&serde_json::json!({ "type": "hello", "msg": "hi" }));
            }
            ClientEvent::Message(message) => tracing::info!("got {message}"),
            ClientEvent::Reconnecting { attempt, delay } => {
                tracing::info!("reconnecting (attempt {attempt}) in {delay:?}")
            }
            ClientEvent::Error(err) => tracing::warn!("{err}"),
            _ => {}
        }
    }
    Ok(())
}
