//! Envelope - the wire format wrapper for all relay messages.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{BatchId, DeviceId, DeviceInfo, RoomId, SyncError};

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Join a relay room
    Join,
    /// Public key and device description
    KeyExchange,
    /// One encrypted batch of digests
    HistoryBatch,
    /// Acknowledgement of a history batch
    BatchAck,
    /// Sender has finished its transfer
    SyncDone,
    /// Peer-reported failure
    Error,
    /// Liveness check
    Ping,
    /// Liveness reply
    Pong,
}

impl MessageType {
    /// Stable snake_case name, as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Join => "join",
            MessageType::KeyExchange => "key_exchange",
            MessageType::HistoryBatch => "history_batch",
            MessageType::BatchAck => "batch_ack",
            MessageType::SyncDone => "sync_done",
            MessageType::Error => "error",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }

    /// Whether the relay forwards this message to the other room members.
    ///
    /// `join` and `ping` are handled by the relay itself.
    pub fn is_relayed(&self) -> bool {
        !matches!(self, MessageType::Join | MessageType::Ping)
    }
}

/// `key_exchange` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchange {
    /// Sender's public key (base64 SPKI).
    pub public_key: String,
    /// Sender's device description.
    pub device_info: DeviceInfo,
}

/// `history_batch` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBatch {
    /// Base64 `nonce || ciphertext || tag` of the JSON-encoded batch.
    pub encrypted_batch: String,
    /// Batch identifier (plaintext copy for acknowledgement).
    pub batch_id: BatchId,
    /// Position of this batch in the transfer.
    pub sequence: u32,
    /// Number of batches in the transfer.
    pub total_batches: u32,
}

/// `batch_ack` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAck {
    /// Acknowledged batch.
    pub batch_id: BatchId,
    /// Acknowledged sequence number.
    pub sequence: u32,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description.
    pub error: String,
}

/// A typed relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Join the envelope's room
    Join,
    /// Public key and device description
    KeyExchange(KeyExchange),
    /// One encrypted batch
    HistoryBatch(HistoryBatch),
    /// Acknowledgement of a batch
    BatchAck(BatchAck),
    /// Transfer finished
    SyncDone,
    /// Peer-reported failure
    Error(ErrorPayload),
    /// Liveness check
    Ping,
    /// Liveness reply
    Pong,
}

impl RelayMessage {
    /// The discriminator for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            RelayMessage::Join => MessageType::Join,
            RelayMessage::KeyExchange(_) => MessageType::KeyExchange,
            RelayMessage::HistoryBatch(_) => MessageType::HistoryBatch,
            RelayMessage::BatchAck(_) => MessageType::BatchAck,
            RelayMessage::SyncDone => MessageType::SyncDone,
            RelayMessage::Error(_) => MessageType::Error,
            RelayMessage::Ping => MessageType::Ping,
            RelayMessage::Pong => MessageType::Pong,
        }
    }

    fn payload(&self) -> Result<Value, SyncError> {
        let value = match self {
            RelayMessage::KeyExchange(p) => serde_json::to_value(p),
            RelayMessage::HistoryBatch(p) => serde_json::to_value(p),
            RelayMessage::BatchAck(p) => serde_json::to_value(p),
            RelayMessage::Error(p) => serde_json::to_value(p),
            RelayMessage::Join | RelayMessage::SyncDone | RelayMessage::Ping | RelayMessage::Pong => {
                Ok(Value::Object(Default::default()))
            }
        };
        value.map_err(SyncError::Serialization)
    }
}

/// The envelope wraps every relay message with routing metadata.
///
/// This is the layer the relay sees. Batch contents travel encrypted inside
/// `history_batch` payloads; the relay only routes by `roomId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Target room
    pub room_id: RoomId,
    /// Sender's device ID
    pub from: DeviceId,
    /// Optional addressee (informational; the relay broadcasts to the room)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DeviceId>,
    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,
    /// Unix timestamp (ms) - informational only, not trusted
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Create a new envelope for sending.
    pub fn new(room_id: RoomId, from: DeviceId, message: &RelayMessage) -> Result<Self, SyncError> {
        Ok(Self {
            msg_type: message.message_type(),
            room_id,
            from,
            to: None,
            payload: message.payload()?,
            timestamp: crate::now_millis(),
        })
    }

    /// Address the envelope to a specific device.
    pub fn with_recipient(mut self, to: DeviceId) -> Self {
        self.to = Some(to);
        self
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(SyncError::Deserialization)
    }

    /// Decode the payload according to the message type.
    pub fn message(&self) -> Result<RelayMessage, SyncError> {
        Ok(match self.msg_type {
            MessageType::Join => RelayMessage::Join,
            MessageType::KeyExchange => RelayMessage::KeyExchange(self.decode_payload()?),
            MessageType::HistoryBatch => RelayMessage::HistoryBatch(self.decode_payload()?),
            MessageType::BatchAck => RelayMessage::BatchAck(self.decode_payload()?),
            MessageType::SyncDone => RelayMessage::SyncDone,
            MessageType::Error => RelayMessage::Error(self.decode_payload()?),
            MessageType::Ping => RelayMessage::Ping,
            MessageType::Pong => RelayMessage::Pong,
        })
    }

    fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        T::deserialize(&self.payload).map_err(|source| SyncError::InvalidPayload {
            msg_type: self.msg_type.as_str(),
            source,
        })
    }
}
