//! Error types for BrainPlus device sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable classification of a sync failure.
///
/// Every error the client surfaces maps to exactly one kind. Kinds are what
/// the host UI switches on; the message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Secure randomness or the crypto primitives are not available.
    CryptoUnavailable,
    /// A public key could not be decoded.
    MalformedKey,
    /// A ciphertext failed authentication or was malformed.
    DecryptionFailed,
    /// The two devices produce vectors in different embedding spaces.
    VectorIncompatible,
    /// The relay could not be reached after all reconnect attempts.
    RelayUnavailable,
    /// A merge was attempted between two different digests.
    IdentityMismatch,
    /// The pairing payload is past its expiry.
    SessionExpired,
    /// A peer or the relay violated the wire protocol.
    Protocol,
    /// The digest store failed.
    Storage,
}

impl ErrorKind {
    /// Stable snake_case name, as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CryptoUnavailable => "crypto_unavailable",
            ErrorKind::MalformedKey => "malformed_key",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::VectorIncompatible => "vector_incompatible",
            ErrorKind::RelayUnavailable => "relay_unavailable",
            ErrorKind::IdentityMismatch => "identity_mismatch",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Envelope payload does not match its message type
    #[error("invalid {msg_type} payload: {source}")]
    InvalidPayload {
        /// Message type the payload was read as
        msg_type: &'static str,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}
