//! # sync-client
//!
//! Client library for BrainPlus end-to-end encrypted device sync.
//!
//! Two devices pair through a short-lived payload (QR code or link), meet in
//! a relay room, agree on a key with P-256 ECDH, and exchange their browsing
//! digests as AES-256-GCM encrypted batches. Each side merges what it
//! receives into its own store. The relay only ever sees ciphertext.
//!
//! ## Features
//!
//! - **E2E Encryption**: P-256 ECDH + HKDF-SHA256, AES-256-GCM with 96-bit nonces
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock relay)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//! - **Resilient Relay Link**: Heartbeats and bounded exponential reconnect
//!
//! ## Example
//!
//! ```ignore
//! use brainplus_sync_client::{MemoryDigestStore, SyncConfig, SyncOrchestrator};
//!
//! let orchestrator = SyncOrchestrator::with_websocket(
//!     SyncConfig::new("wss://relay.example.com/ws"),
//!     store,
//!     vectors,
//!     identity,
//! );
//!
//! // On the first device
//! let payload = orchestrator.initiate_pairing().await?;
//! println!("{}", payload.to_link()?);
//!
//! // On the second device
//! orchestrator.accept_pairing(&PairingPayload::parse(&link)?).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod orchestrator;
pub mod relay;
pub mod store;
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use crypto::{CryptoError, KeyPair, PublicKey, SharedKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::ClientError;
pub use orchestrator::{SyncOrchestrator, SyncProgress};
pub use relay::{LinkState, RelayClient, RelayEvent, RelayOptions};
pub use store::{
    DeviceIdentityProvider, DigestStore, MemoryDigestStore, StoreError, VectorMetadataProvider,
};
pub use transport::{MockRelay, MockTransport, Transport, TransportError, WebSocketTransport};

// Session types callers need alongside the orchestrator.
pub use sync_core::{Failure, PairingPayload, Role, SessionState};
