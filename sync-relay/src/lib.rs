//! # sync-relay
//!
//! Room relay server for BrainPlus device sync.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections from devices
//! - Groups connections into rooms named by the pairing payload
//! - Forwards envelopes to the other members of a room
//! - Never decrypts anything (batches travel encrypted end to end)
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                    ┌── Device B
//!            │  WebSocket (JSON)  │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │        sync-relay          │
//!        │  rooms: roomId → members   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Every frame is a JSON envelope `{type, roomId, from, to?, payload, timestamp}`:
//! - `join` adds the connection to the room and restarts its inactivity timer
//! - `ping` is answered with `pong`
//! - everything else is forwarded to the other room members
//!
//! Rooms are deleted when their last member leaves or after ten minutes
//! without activity. Connections that miss a 30 second WebSocket heartbeat
//! are terminated.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod session;
