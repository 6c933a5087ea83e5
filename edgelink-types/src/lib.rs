#![deny(missing_docs)]
//! Core type definitions for the edgelink session layer.
//!
//! This crate groups together the strongly-typed values shared between the
//! edgelink server and client:
//!
//! * [`Address`], the printable canonical identity derived from a wallet
//!   public key.
//! * The wallet primitive (see the [`wallet`] module): key generation,
//!   restore, signing and address-recovering verification.
//! * The wire envelope (see the [`wire`] module): the tagged JSON messages
//!   exchanged over the WebSocket, with unknown shapes passed through as
//!   user messages.
//!
//! Use these types to pass, store, and (de)serialize identities and wire
//! messages in a type-safe way throughout your application.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod wallet;
pub mod wire;

pub use wallet::Wallet;
pub use wire::Envelope;

/// Number of bytes of an [`Address`].
pub const ADDRESS_LEN: usize = 20;

/// The canonical identity of a wallet.
///
/// Derived from the wallet public key (see [`wallet`] for the derivation)
/// and rendered as a `0x`-prefixed lowercase hex string on the wire and in
/// logs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Creates a new `Address` by wrapping the raw bytes.
    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn into_inner(self) -> [u8; ADDRESS_LEN] {
        self.0
    }
}

/// Error returned when parsing an [`Address`] from a string.
#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    /// The string is not valid hex.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// The decoded value has the wrong length.
    #[error("address must be {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_str = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_str)?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|rest: Vec<u8>| AddressParseError::Length(rest.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Milliseconds since the Unix epoch, the timestamp unit of the wire format.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrips_through_display() {
        let address = Address::new([0xab; ADDRESS_LEN]);
        let text = address.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.parse::<Address>().unwrap(), address);
        // without the prefix as well
        assert_eq!(text[2..].parse::<Address>().unwrap(), address);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(matches!(
            "0xabcd".parse::<Address>(),
            Err(AddressParseError::Length(2))
        ));
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn address_serde_is_a_string() {
        let address = Address::new([7; ADDRESS_LEN]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{address}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
