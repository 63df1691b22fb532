//! # sync-core
//!
//! Pure logic for BrainPlus device sync (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay, crypto, storage) is performed by `sync-client`,
//! which interprets the actions produced by the session machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod codec;
pub mod merge;
pub mod pairing;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use codec::{
    chunk_into_batches, decode_batch, decode_vector, encode_batch, encode_vector, estimate_size,
    from_wire, to_wire, CodecError,
};
pub use merge::{merge, should_merge, MergeError};
pub use pairing::{PairingError, PairingPayload, DEFAULT_PAIRING_TTL};
pub use state::{Action, Event, Failure, Role, SessionMachine, SessionState};
