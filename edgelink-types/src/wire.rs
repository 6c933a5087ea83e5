//! The wire envelope: one JSON object per WebSocket text frame.
//!
//! Every frame carries a `type` string discriminator. The reserved types
//! (`authenticate`, `heartbeat`, `disconnect`, `error`) decode into their
//! dedicated variants; everything else passes through as [`Envelope::User`]
//! with the payload untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Address, Wallet, now_ms, wallet};

/// Application close codes sent alongside the advisory status line when the
/// server terminates a connection.
pub mod close_codes {
    /// A pre-auth or idle deadline was exceeded.
    pub const TIMEOUT: u16 = 4001;
    /// Malformed frame or protocol violation.
    pub const BAD_REQUEST: u16 = 4002;
    /// Authentication was rejected (signature, whitelist, or policy).
    pub const POLICY: u16 = 4003;
    /// A second connection authenticated for an already-present address.
    pub const COLLISION: u16 = 4009;
}

/// The handshake message. Sent by the client on open and echoed (freshly
/// signed) by the server on success.
///
/// The signature is over the ASCII decimal representation of `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authenticate {
    /// Claimed wallet address of the sender.
    pub address: Address,
    /// Sender clock at signing time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Hex-encoded recoverable signature over `timestamp.to_string()`.
    pub signature: String,
}

impl Authenticate {
    /// Builds a handshake message for `wallet`, signed at `timestamp`.
    pub fn signed(wallet: &Wallet, timestamp: i64) -> Self {
        Self {
            address: wallet.address(),
            timestamp,
            signature: wallet.sign(&timestamp.to_string()).to_string(),
        }
    }

    /// Returns `true` iff the signature verifies against the claimed
    /// address. Freshness is the receiver's concern, not checked here.
    pub fn verify(&self) -> bool {
        wallet::verify(&self.timestamp.to_string(), &self.signature, &self.address)
    }
}

/// Application-level liveness message. Either side may originate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sender clock, milliseconds since the Unix epoch.
    #[serde(default)]
    pub ts: i64,
}

impl Heartbeat {
    /// A heartbeat stamped with the current time.
    pub fn now() -> Self {
        Self { ts: now_ms() }
    }
}

/// A single decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The handshake message.
    Authenticate(Authenticate),
    /// Liveness message.
    Heartbeat(Heartbeat),
    /// Graceful close request.
    Disconnect,
    /// Peer-reported error; payload kept verbatim.
    Error(Value),
    /// Any non-reserved `type`; payload kept verbatim and passed through to
    /// the application.
    User(Value),
}

/// Errors raised while decoding a text frame into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame is not valid JSON, or a reserved payload has the wrong
    /// shape.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The top-level JSON value is not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object has no string `type` discriminator.
    #[error("missing `type` discriminator")]
    MissingType,
}

impl Envelope {
    /// Decodes a text frame.
    ///
    /// Reserved types must match their payload shape exactly; unknown types
    /// decode to [`Envelope::User`].
    pub fn from_text(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(WireError::NotAnObject);
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingType)?
            .to_owned();
        Ok(match kind.as_str() {
            "authenticate" => Self::Authenticate(serde_json::from_value(value)?),
            "heartbeat" => Self::Heartbeat(serde_json::from_value(value)?),
            "disconnect" => Self::Disconnect,
            "error" => Self::Error(value),
            _ => Self::User(value),
        })
    }

    /// Encodes the envelope as the JSON object it represents.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Authenticate(auth) => tagged(auth, "authenticate"),
            Self::Heartbeat(heartbeat) => tagged(heartbeat, "heartbeat"),
            Self::Disconnect => serde_json::json!({ "type": "disconnect" }),
            Self::Error(value) | Self::User(value) => value.clone(),
        }
    }

    /// Encodes the envelope as a text frame.
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

fn tagged<T: Serialize>(payload: &T, kind: &str) -> Value {
    let mut value = serde_json::to_value(payload).expect("wire payloads serialize");
    value
        .as_object_mut()
        .expect("wire payloads are objects")
        .insert("type".to_owned(), Value::String(kind.to_owned()));
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_roundtrips() {
        let wallet = Wallet::generate();
        let auth = Authenticate::signed(&wallet, 1_700_000_000_000);
        assert!(auth.verify());

        let text = Envelope::Authenticate(auth.clone()).to_text();
        match Envelope::from_text(&text).unwrap() {
            Envelope::Authenticate(parsed) => assert_eq!(parsed, auth),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn tampered_authenticate_fails_verification() {
        let wallet = Wallet::generate();
        let mut auth = Authenticate::signed(&wallet, 1_700_000_000_000);
        auth.timestamp += 1;
        assert!(!auth.verify());
    }

    #[test]
    fn heartbeat_roundtrips() {
        let text = Envelope::Heartbeat(Heartbeat { ts: 17 }).to_text();
        assert_eq!(
            Envelope::from_text(&text).unwrap(),
            Envelope::Heartbeat(Heartbeat { ts: 17 })
        );
    }

    #[test]
    fn unknown_types_pass_through() {
        let text = r#"{"type":"hello","msg":"hi"}"#;
        match Envelope::from_text(text).unwrap() {
            Envelope::User(value) => {
                assert_eq!(value["type"], "hello");
                assert_eq!(value["msg"], "hi");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn user_envelope_encodes_verbatim() {
        let value = serde_json::json!({ "type": "hello", "n": 3 });
        assert_eq!(Envelope::User(value.clone()).to_value(), value);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            Envelope::from_text("not json"),
            Err(WireError::Json(_))
        ));
        assert!(matches!(
            Envelope::from_text("[1,2]"),
            Err(WireError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::from_text(r#"{"msg":"hi"}"#),
            Err(WireError::MissingType)
        ));
        // reserved type with a broken payload is an error, not a user message
        assert!(matches!(
            Envelope::from_text(r#"{"type":"authenticate","address":3}"#),
            Err(WireError::Json(_))
        ));
    }
}
