//! The three periodic sweepers: heartbeat emission, pending-auth expiry,
//! and idle-client eviction.
//!
//! Each sweeper is its own task and runs iff its interval is strictly
//! positive. Sweepers snapshot the tables under the lock and do their I/O
//! outside of it; eviction only cancels the connection task, which owns the
//! teardown (table removal and the `Disconnected` event).

use std::sync::Arc;
use std::time::Duration;

use edgelink_types::Envelope;
use edgelink_types::wire::Heartbeat;

use crate::Inner;
use crate::error::ServerError;
use crate::metrics::{METRICS_ID_SERVER_CLIENTS_EVICTED_IDLE, METRICS_ID_SERVER_HEARTBEATS};

pub(crate) fn spawn_all(inner: &Arc<Inner>) {
    if inner.config.heartbeat_interval > Duration::ZERO {
        tokio::spawn(heartbeat_loop(Arc::clone(inner)));
    }
    if inner.config.auth_check_interval > Duration::ZERO {
        tokio::spawn(auth_sweep_loop(Arc::clone(inner)));
    }
    if inner.config.client_timeout_interval > Duration::ZERO {
        tokio::spawn(idle_sweep_loop(Arc::clone(inner)));
    }
}

/// Sends a control-frame ping and an application heartbeat to every
/// authenticated peer. Either one coming back is enough to evidence
/// liveness; both go out.
async fn heartbeat_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval);
    // first tick triggers instantly
    interval.tick().await;
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                let peers = inner.registry.clients_snapshot();
                if peers.is_empty() {
                    continue;
                }
                let beat = Envelope::Heartbeat(Heartbeat::now()).to_text();
                tracing::trace!(peers = peers.len(), "sending heartbeats");
                for peer in peers {
                    peer.ping();
                    let _ = peer.send_text(beat.clone());
                }
                ::metrics::counter!(METRICS_ID_SERVER_HEARTBEATS).increment(1);
            }
        }
    }
}

/// Evicts pending-auth sockets older than the auth timeout. The connection
/// task observes the cancellation and rejects with a 408.
async fn auth_sweep_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.auth_check_interval);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                for cancel in inner.registry.expired_pending(inner.config.auth_timeout) {
                    cancel.cancel();
                }
            }
        }
    }
}

/// Closes authenticated peers whose last activity is older than the client
/// timeout.
async fn idle_sweep_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.client_timeout_interval);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                for peer in inner.registry.idle_clients(inner.config.client_timeout) {
                    tracing::debug!(peer = %peer.address(), id = %peer.id(), "evicting idle peer");
                    peer.close_with(&ServerError::IdleTimeout(peer.address()));
                    ::metrics::counter!(METRICS_ID_SERVER_CLIENTS_EVICTED_IDLE).increment(1);
                }
            }
        }
    }
}
