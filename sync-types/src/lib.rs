//! # sync-types
//!
//! Wire format types for BrainPlus device sync.
//!
//! This crate provides the foundational types used across all sync crates:
//! - [`DeviceId`], [`RoomId`], [`BatchId`] - Identity types
//! - [`DeviceInfo`], [`VectorSpace`] - Per-session device description
//! - [`Digest`], [`WireDigest`], [`Batch`] - The synced dataset and its transport form
//! - [`Envelope`], [`RelayMessage`] - Relay wire protocol
//! - [`ErrorKind`], [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod device;
mod digest;
mod envelope;
mod error;
mod ids;

pub use batch::Batch;
pub use device::{DeviceClass, DeviceInfo, VectorSpace};
pub use digest::{digest_id_for_url, Digest, DigestContext, WireDigest};
pub use envelope::{
    BatchAck, Envelope, ErrorPayload, HistoryBatch, KeyExchange, MessageType, RelayMessage,
};
pub use error::{ErrorKind, SyncError};
pub use ids::{BatchId, DeviceId, RoomId};

/// Wire protocol version carried in pairing payloads and device info.
pub const PROTOCOL_VERSION: u32 = 1;

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
