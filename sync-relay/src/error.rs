//! Error types for sync-relay.

/// Main error type for sync-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] sync_types::SyncError),

    /// Reply could not be encoded.
    #[error("envelope serialization failed: {0}")]
    Serialization(sync_types::SyncError),

    /// Frame from a connection the relay does not know.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),

    /// Relayed message from a connection that has not joined the room.
    #[error("not a member of room {room_id}")]
    NotInRoom {
        /// Room named in the envelope.
        room_id: String,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_display() {
        let err = ProtocolError::NotInRoom {
            room_id: "room-1".into(),
        };
        assert_eq!(err.to_string(), "not a member of room room-1");

        let err = RelayError::from(ProtocolError::UnknownConnection(7));
        assert_eq!(err.to_string(), "protocol error: unknown connection: 7");
    }
}
