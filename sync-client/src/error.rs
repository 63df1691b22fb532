//! Client errors.

use sync_core::{CodecError, MergeError, PairingError};
use sync_types::{ErrorKind, SyncError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Merge error.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Pairing payload error.
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Envelope encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] SyncError),

    /// Digest store error.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The relay could not be reached or the connection was lost for good.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// The peer broke the session protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Crypto(e) => e.kind(),
            ClientError::Transport(_) | ClientError::RelayUnavailable(_) => {
                ErrorKind::RelayUnavailable
            }
            ClientError::Codec(e) => e.kind(),
            ClientError::Merge(e) => e.kind(),
            ClientError::Pairing(e) => e.kind(),
            ClientError::Wire(e) => e.kind(),
            ClientError::Storage(_) => ErrorKind::Storage,
            ClientError::Protocol(_) | ClientError::Config(_) => ErrorKind::Protocol,
        }
    }
}
