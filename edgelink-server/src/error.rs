//! This module defines the [`ServerError`] surfaced through the server
//! event stream and by the send API. It further provides the mapping from a
//! rejection to the advisory status line and the close frame the server
//! writes before terminating a connection.

use edgelink_types::Address;
use edgelink_types::wire::{WireError, close_codes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// All errors a connection or an API call may surface.
///
/// Protocol-level errors are local to one connection: they terminate that
/// connection only and reach the caller as events, never as panics. Only
/// listener bind failures are terminal for the server and those are
/// reported from [`crate::ServerBuilder::bind`] directly.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A received frame was not a well-formed wire message.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The first message on a connection was not `authenticate`.
    #[error("invalid message before authentication")]
    InvalidPreAuthMessage,
    /// The claimed address is not in the configured whitelist.
    #[error("address not in whitelist: {0}")]
    NotWhitelisted(Address),
    /// The custom authentication predicate rejected the address.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(Address),
    /// The handshake timestamp is outside the freshness window.
    #[error("authentication timeout: {0}")]
    AuthenticationTimeout(Address),
    /// The handshake signature does not verify against the claimed address.
    #[error("invalid signature: {0}")]
    InvalidSignature(Address),
    /// A peer is already authenticated for this address and replacement is
    /// disabled.
    #[error("client already exists: {0}")]
    ClientExists(Address),
    /// The existing peer for this address was evicted in favor of a new
    /// connection.
    #[error("client replaced: {0}")]
    ClientReplaced(Address),
    /// The connection did not authenticate before the deadline.
    #[error("authentication deadline exceeded")]
    PendingAuthExpired,
    /// The peer exceeded the inactivity deadline.
    #[error("client timeout: {0}")]
    IdleTimeout(Address),
    /// An `authenticate` message arrived on an already authenticated
    /// channel.
    #[error("unexpected authenticate from {0}")]
    UnexpectedAuthenticate(Address),
    /// A binary frame arrived where only JSON text frames are valid.
    #[error("unexpected binary frame from {0}")]
    UnexpectedBinary(Address),
    /// The peer sent a reserved `error` message.
    #[error("peer {0} reported: {1}")]
    PeerReported(Address, String),
    /// `send` was called for an address without an authenticated peer.
    #[error("unknown client: {0}")]
    UnknownClient(Address),
    /// The peer's outbound channel is gone; the connection is shutting
    /// down.
    #[error("connection closed")]
    ConnectionClosed,
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ServerError {
    /// The HTTP-style advisory status line written into the channel before
    /// closing, for rejections that carry one.
    ///
    /// The line is advisory only; peers must not rely on parsing it.
    pub(crate) fn advisory_line(&self) -> Option<&'static str> {
        match self {
            Self::Wire(_) | Self::InvalidPreAuthMessage | Self::UnexpectedAuthenticate(_) => {
                Some("400 Bad Request")
            }
            Self::AuthenticationTimeout(_) | Self::InvalidSignature(_) => Some("401 Unauthorized"),
            Self::NotWhitelisted(_) | Self::AuthenticationFailed(_) => Some("403 Forbidden"),
            Self::PendingAuthExpired | Self::IdleTimeout(_) => Some("408 Request Timeout"),
            Self::ClientExists(_) | Self::ClientReplaced(_) => Some("409 Conflict"),
            _ => None,
        }
    }

    /// The close frame terminating the connection, for rejections that
    /// close it.
    pub(crate) fn close_frame(&self) -> Option<CloseFrame> {
        let code = match self {
            Self::Wire(_) | Self::InvalidPreAuthMessage | Self::UnexpectedAuthenticate(_) => {
                close_codes::BAD_REQUEST
            }
            Self::AuthenticationTimeout(_)
            | Self::InvalidSignature(_)
            | Self::NotWhitelisted(_)
            | Self::AuthenticationFailed(_) => close_codes::POLICY,
            Self::PendingAuthExpired | Self::IdleTimeout(_) => close_codes::TIMEOUT,
            Self::ClientExists(_) | Self::ClientReplaced(_) => close_codes::COLLISION,
            _ => return None,
        };
        Some(CloseFrame {
            code: CloseCode::from(code),
            reason: self.to_string().into(),
        })
    }
}

/// Whether a read error is just the peer hanging up without the closing
/// handshake. Those are routine and not worth an error event.
pub(crate) fn is_benign_disconnect(err: &tokio_tungstenite::tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::error::ProtocolError;
    match err {
        tokio_tungstenite::tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake,
        ) => true,
        tokio_tungstenite::tungstenite::Error::Io(io_err) => {
            io_err.kind() == std::io::ErrorKind::ConnectionReset
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_types::Wallet;

    #[test]
    fn rejections_map_to_status_lines() {
        let address = Wallet::generate().address();
        assert_eq!(
            ServerError::InvalidSignature(address).advisory_line(),
            Some("401 Unauthorized")
        );
        assert_eq!(
            ServerError::NotWhitelisted(address).advisory_line(),
            Some("403 Forbidden")
        );
        assert_eq!(
            ServerError::ClientExists(address).advisory_line(),
            Some("409 Conflict")
        );
        assert_eq!(
            ServerError::PendingAuthExpired.advisory_line(),
            Some("408 Request Timeout")
        );
        assert_eq!(ServerError::UnknownClient(address).advisory_line(), None);
    }

    #[test]
    fn rejections_map_to_close_codes() {
        let address = Wallet::generate().address();
        let frame = ServerError::ClientExists(address).close_frame().unwrap();
        assert_eq!(u16::from(frame.code), close_codes::COLLISION);
        let frame = ServerError::PendingAuthExpired.close_frame().unwrap();
        assert_eq!(u16::from(frame.code), close_codes::TIMEOUT);
        assert!(ServerError::ConnectionClosed.close_frame().is_none());
    }
}
