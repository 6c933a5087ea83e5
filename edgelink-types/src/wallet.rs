//! The wallet primitive: a secp256k1 keypair bound to an [`Address`].
//!
//! Signatures are recoverable ECDSA over the SHA-256 digest of the message,
//! serialized as 65 bytes (`r ‖ s ‖ recovery id`) and hex-encoded on the
//! wire. Verification does not need the public key: it recovers the signer
//! from the signature and compares the derived address against the claimed
//! one. The address itself is the first 20 bytes of the SHA-256 digest of
//! the SEC1-compressed public key.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use sha2::{Digest as _, Sha256};

use crate::{ADDRESS_LEN, Address};

/// Length of a serialized [`Signature`] in bytes.
pub const SIGNATURE_LEN: usize = 65;

/// Errors returned when restoring a [`Wallet`] or parsing a [`Signature`].
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The input is not valid hex.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// The private key bytes do not form a valid secp256k1 scalar.
    #[error("invalid private key")]
    InvalidPrivateKey,
    /// The decoded signature has the wrong length.
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    SignatureLength(usize),
    /// The recovery id byte is out of range.
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    /// The signature scalars are invalid or no public key can be recovered.
    #[error("malformed signature")]
    MalformedSignature,
}

/// A keypair and its derived [`Address`].
///
/// Immutable for the lifetime of an endpoint. The signing key never leaves
/// this struct except through [`Wallet::private_key_hex`].
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generates a fresh wallet from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Restores a wallet from a hex-encoded private key.
    ///
    /// Accepts the key with or without a `0x` prefix.
    pub fn from_private_key(hex_key: &str) -> Result<Self, WalletError> {
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(hex_key)?;
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|_| WalletError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = derive_address(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The canonical address of this wallet.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Exports the private key as lowercase hex (no prefix).
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs the given message string.
    pub fn sign(&self, message: &str) -> Signature {
        let (signature, recovery_id) = self
            .signing_key
            .sign_recoverable(message.as_bytes())
            .expect("signing with a valid key cannot fail");
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Signature(bytes)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never log key material
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish()
    }
}

/// A recoverable ECDSA signature, 65 bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Recovers the signer of `message` and returns the derived [`Address`].
    ///
    /// Fails iff the signature bytes do not describe a recoverable point for
    /// this message.
    pub fn recover_address(&self, message: &str) -> Result<Address, WalletError> {
        let signature = k256::ecdsa::Signature::from_slice(&self.0[..64])
            .map_err(|_| WalletError::MalformedSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(WalletError::InvalidRecoveryId(self.0[64]))?;
        let verifying_key =
            VerifyingKey::recover_from_msg(message.as_bytes(), &signature, recovery_id)
                .map_err(|_| WalletError::MalformedSignature)?;
        Ok(derive_address(&verifying_key))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let bytes: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|rest: Vec<u8>| WalletError::SignatureLength(rest.len()))?;
        Ok(Self(bytes))
    }
}

/// Verifies that `signature` (hex) was produced over `message` by the wallet
/// behind `address`.
///
/// Returns `false` for malformed signatures as well as for honest
/// mismatches; callers that need to distinguish should parse the
/// [`Signature`] themselves.
pub fn verify(message: &str, signature: &str, address: &Address) -> bool {
    let Ok(signature) = signature.parse::<Signature>() else {
        return false;
    };
    match signature.recover_address(message) {
        Ok(recovered) => recovered == *address,
        Err(_) => false,
    }
}

fn derive_address(verifying_key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(verifying_key.to_encoded_point(true).as_bytes());
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
    Address::new(bytes)
}
