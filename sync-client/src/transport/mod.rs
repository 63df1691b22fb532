//! Transport abstraction for BrainPlus device sync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, in-memory mock relay).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented, carrying JSON
//! text frames:
//! - `connect()` establishes (or re-establishes) a connection
//! - `send()` transmits one frame
//! - `recv()` receives one frame
//! - `close()` gracefully terminates
//!
//! `send()` and `recv()` may run concurrently from different tasks.
//!
//! # Example
//!
//! ```ignore
//! let transport = WebSocketTransport::new();
//! transport.connect("wss://relay.example.com/ws").await?;
//! transport.send(envelope.to_json()?).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::{MockRelay, MockTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Transport trait for sending and receiving relay frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at `url`, replacing any previous connection.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Receive one text frame.
    ///
    /// Waits until a frame is available. Returns
    /// [`TransportError::ConnectionClosed`] once the connection drops.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
