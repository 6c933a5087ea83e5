//! The two shared tables of the server: upgraded sockets awaiting
//! authentication, and the address → peer map.
//!
//! A transport lives in at most one table at any time. Promotion removes
//! the pending entry and inserts the peer in the same critical section; the
//! address map is one-to-one and replacement is atomic. Critical sections
//! never block on I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use edgelink_types::Address;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServerError;
use crate::metrics::{METRICS_ID_SERVER_CLIENTS, METRICS_ID_SERVER_PENDING_AUTH};
use crate::peer::Peer;

struct PendingAuth {
    upgraded_at: Instant,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<Uuid, PendingAuth>,
    clients: HashMap<Address, Peer>,
}

/// Keeps track of all pending-auth sockets and authenticated peers.
#[derive(Default, Clone)]
pub(crate) struct Registry(Arc<Mutex<Tables>>);

/// A guard for a pending-auth entry.
///
/// As long as this guard exists the connection counts as awaiting
/// authentication. On drop, removes the entry; removal is a no-op if the
/// connection was promoted in the meantime.
#[must_use]
pub(crate) struct PendingGuard {
    id: Uuid,
    registry: Registry,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.remove_pending(self.id);
    }
}

impl Registry {
    /// Registers an upgraded socket as awaiting authentication.
    pub(crate) fn insert_pending(&self, id: Uuid, cancel: CancellationToken) -> PendingGuard {
        self.0.lock().pending.insert(
            id,
            PendingAuth {
                upgraded_at: Instant::now(),
                cancel,
            },
        );
        ::metrics::gauge!(METRICS_ID_SERVER_PENDING_AUTH).increment(1);
        PendingGuard {
            id,
            registry: self.clone(),
        }
    }

    fn remove_pending(&self, id: Uuid) {
        if self.0.lock().pending.remove(&id).is_some() {
            ::metrics::gauge!(METRICS_ID_SERVER_PENDING_AUTH).decrement(1);
        }
    }

    /// Promotes a pending connection to an authenticated peer.
    ///
    /// Fails with [`ServerError::ClientExists`] if the address is taken and
    /// `replace_existing` is `false`; otherwise returns the evicted peer,
    /// if any. The pending entry is removed and the peer inserted in one
    /// critical section.
    pub(crate) fn promote(
        &self,
        pending_id: Uuid,
        peer: Peer,
        replace_existing: bool,
    ) -> Result<Option<Peer>, ServerError> {
        let address = peer.address();
        let mut tables = self.0.lock();
        if tables.clients.contains_key(&address) && !replace_existing {
            return Err(ServerError::ClientExists(address));
        }
        if tables.pending.remove(&pending_id).is_some() {
            ::metrics::gauge!(METRICS_ID_SERVER_PENDING_AUTH).decrement(1);
        }
        let evicted = tables.clients.insert(address, peer);
        if evicted.is_none() {
            ::metrics::gauge!(METRICS_ID_SERVER_CLIENTS).increment(1);
        }
        Ok(evicted)
    }

    /// Removes the peer for `address`, but only if it still is the
    /// connection identified by `id`. A replaced connection must not tear
    /// down its successor.
    pub(crate) fn remove_client_if(&self, address: &Address, id: Uuid) -> bool {
        let mut tables = self.0.lock();
        if tables.clients.get(address).is_some_and(|peer| peer.id() == id) {
            tables.clients.remove(address);
            ::metrics::gauge!(METRICS_ID_SERVER_CLIENTS).decrement(1);
            true
        } else {
            false
        }
    }

    pub(crate) fn client(&self, address: &Address) -> Option<Peer> {
        self.0.lock().clients.get(address).cloned()
    }

    /// Snapshot of all authenticated peers.
    pub(crate) fn clients_snapshot(&self) -> Vec<Peer> {
        self.0.lock().clients.values().cloned().collect()
    }

    /// Cancellation handles of pending entries older than `deadline`.
    pub(crate) fn expired_pending(&self, deadline: Duration) -> Vec<CancellationToken> {
        self.0
            .lock()
            .pending
            .values()
            .filter(|entry| entry.upgraded_at.elapsed() > deadline)
            .map(|entry| entry.cancel.clone())
            .collect()
    }

    /// Peers whose last activity is older than `deadline`.
    pub(crate) fn idle_clients(&self, deadline: Duration) -> Vec<Peer> {
        self.0
            .lock()
            .clients
            .values()
            .filter(|peer| peer.idle_for() > deadline)
            .cloned()
            .collect()
    }

    /// Drains both tables, returning the authenticated peers for a final
    /// best-effort close.
    pub(crate) fn clear(&self) -> Vec<Peer> {
        let mut tables = self.0.lock();
        tables.pending.clear();
        let peers: Vec<Peer> = tables.clients.drain().map(|(_, peer)| peer).collect();
        ::metrics::gauge!(METRICS_ID_SERVER_PENDING_AUTH).set(0);
        ::metrics::gauge!(METRICS_ID_SERVER_CLIENTS).set(0);
        peers
    }
}
