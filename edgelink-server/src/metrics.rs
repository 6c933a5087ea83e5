//! Metrics definitions for the edgelink server.
//!
//! This module defines all metrics keys used by the server and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for the number of authenticated peers.
pub const METRICS_ID_SERVER_CLIENTS: &str = "edgelink.server.clients";
/// Metrics key for the number of upgraded sockets awaiting authentication.
pub const METRICS_ID_SERVER_PENDING_AUTH: &str = "edgelink.server.pending_auth";
/// Metrics key for successful authentications.
pub const METRICS_ID_SERVER_AUTH_ACCEPTED: &str = "edgelink.server.auth.accepted";
/// Metrics key for rejected pre-auth connections.
pub const METRICS_ID_SERVER_AUTH_REJECTED: &str = "edgelink.server.auth.rejected";
/// Metrics key for peers evicted in favor of a newer connection.
pub const METRICS_ID_SERVER_CLIENTS_REPLACED: &str = "edgelink.server.clients.replaced";
/// Metrics key for peers evicted by the idle sweeper.
pub const METRICS_ID_SERVER_CLIENTS_EVICTED_IDLE: &str = "edgelink.server.clients.evicted_idle";
/// Metrics key for heartbeat rounds sent by the heartbeat sweeper.
pub const METRICS_ID_SERVER_HEARTBEATS: &str = "edgelink.server.heartbeats";

/// Describe all metrics used by the server.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_SERVER_CLIENTS,
        metrics::Unit::Count,
        "Number of authenticated peers"
    );

    metrics::describe_gauge!(
        METRICS_ID_SERVER_PENDING_AUTH,
        metrics::Unit::Count,
        "Number of upgraded sockets awaiting authentication"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_AUTH_ACCEPTED,
        metrics::Unit::Count,
        "Number of successful authentications"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_AUTH_REJECTED,
        metrics::Unit::Count,
        "Number of rejected pre-auth connections"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_CLIENTS_REPLACED,
        metrics::Unit::Count,
        "Number of peers evicted in favor of a newer connection for the same address"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_CLIENTS_EVICTED_IDLE,
        metrics::Unit::Count,
        "Number of peers evicted because they exceeded the inactivity deadline"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_HEARTBEATS,
        metrics::Unit::Count,
        "Number of heartbeat rounds sent to authenticated peers"
    );
}
