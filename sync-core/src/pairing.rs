//! Pairing payload creation and validation.
//!
//! The initiating device publishes a [`PairingPayload`] (rendered as a QR
//! code or copied as a link). The responder reads it, checks it is still
//! valid, and uses the embedded public key and room to start the session.
//!
//! The pairing flow:
//! 1. Device A generates a key pair and a fresh room, then shows the payload
//! 2. Device B reads the payload and validates version and expiry
//! 3. Device B joins the room and sends its own public key
//! 4. Both devices derive the same session key

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sync_types::{now_millis, DeviceId, ErrorKind, RoomId, PROTOCOL_VERSION};

/// Default pairing payload TTL (5 minutes).
pub const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(300);

/// Error type for pairing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// The payload is invalid (bad base64, bad JSON, or empty fields).
    InvalidPayload(String),
    /// The payload has expired.
    Expired,
    /// Version mismatch.
    UnsupportedVersion(u32),
}

impl PairingError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairingError::Expired => ErrorKind::SessionExpired,
            PairingError::InvalidPayload(_) | PairingError::UnsupportedVersion(_) => {
                ErrorKind::Protocol
            }
        }
    }
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingError::InvalidPayload(msg) => write!(f, "invalid pairing payload: {}", msg),
            PairingError::Expired => write!(f, "pairing payload has expired"),
            PairingError::UnsupportedVersion(v) => {
                write!(f, "unsupported pairing payload version: {}", v)
            }
        }
    }
}

impl std::error::Error for PairingError {}

/// The data one device shows another to start a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPayload {
    /// The initiating device.
    pub device_id: DeviceId,
    /// Relay (signaling) WebSocket URL.
    pub signaling_url: String,
    /// Single-use relay room.
    pub room_id: RoomId,
    /// Initiator's public key (base64 SPKI).
    pub public_key: String,
    /// Unix ms after which the payload is invalid.
    pub expires_at: u64,
    /// Protocol version.
    pub version: u32,
}

impl PairingPayload {
    /// Create a payload with a fresh room and the default TTL (5 minutes).
    pub fn create(
        device_id: DeviceId,
        signaling_url: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self::create_with_ttl(device_id, signaling_url, public_key, DEFAULT_PAIRING_TTL)
    }

    /// Create a payload with a fresh room and a custom TTL.
    pub fn create_with_ttl(
        device_id: DeviceId,
        signaling_url: impl Into<String>,
        public_key: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            device_id,
            signaling_url: signaling_url.into(),
            room_id: RoomId::random(),
            public_key: public_key.into(),
            expires_at: now_millis().saturating_add(ttl.as_millis() as u64),
            version: PROTOCOL_VERSION,
        }
    }

    /// Check if the payload has expired at `now` (Unix ms).
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Check if the payload has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Validate structure, version, and expiry against `now` (Unix ms).
    pub fn validate_at(&self, now: u64) -> Result<(), PairingError> {
        if self.version != PROTOCOL_VERSION {
            return Err(PairingError::UnsupportedVersion(self.version));
        }
        if self.signaling_url.is_empty() {
            return Err(PairingError::InvalidPayload("empty signaling url".into()));
        }
        if self.room_id.as_str().is_empty() {
            return Err(PairingError::InvalidPayload("empty room id".into()));
        }
        if self.public_key.is_empty() {
            return Err(PairingError::InvalidPayload("empty public key".into()));
        }
        if self.is_expired_at(now) {
            return Err(PairingError::Expired);
        }
        Ok(())
    }

    /// Validate against the current time.
    pub fn validate(&self) -> Result<(), PairingError> {
        self.validate_at(now_millis())
    }

    /// Encode as the JSON text rendered into QR codes.
    pub fn to_json(&self) -> Result<String, PairingError> {
        serde_json::to_string(self)
            .map_err(|e| PairingError::InvalidPayload(format!("json encode: {}", e)))
    }

    /// Decode from JSON text.
    pub fn from_json(json: &str) -> Result<Self, PairingError> {
        serde_json::from_str(json)
            .map_err(|e| PairingError::InvalidPayload(format!("json parse: {}", e)))
    }

    /// Encode as a compact URL-safe string, convenient for copy/paste.
    ///
    /// Format: `BASE64URL(JSON(payload))`
    pub fn to_link(&self) -> Result<String, PairingError> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_json()?.as_bytes()))
    }

    /// Decode either the JSON form or the link form.
    pub fn parse(text: &str) -> Result<Self, PairingError> {
        let text = text.trim();
        if text.starts_with('{') {
            return Self::from_json(text);
        }
        let json_bytes = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|e| PairingError::InvalidPayload(format!("base64 decode: {}", e)))?;
        serde_json::from_slice(&json_bytes)
            .map_err(|e| PairingError::InvalidPayload(format!("json parse: {}", e)))
    }
}
