//! Sync session state machine for BrainPlus device sync.
//!
//! This module provides a pure, side-effect-free state machine for one
//! pairing-and-sync session. The machine takes events as input and produces
//! a new machine plus a list of actions to execute.
//!
//! The actual I/O (relay, crypto, storage) is performed by sync-client,
//! not by this module. This enables instant unit testing without mocks.
//!
//! ```text
//! idle → initiating → waiting → connected → syncing → complete
//!           └──────────┴───────────┴───────────┴──→ failed
//! ```

use serde::Serialize;
use sync_types::ErrorKind;

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    Idle,
    /// Keys being generated, relay being joined.
    Initiating,
    /// In the room, waiting for the peer's key.
    Waiting,
    /// Shared key derived, vector spaces being compared.
    Connected,
    /// Batches flowing in both directions.
    Syncing,
    /// Both transfers finished and merged.
    Complete,
    /// Session ended with a fatal error.
    Failed,
}

impl SessionState {
    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a session is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Complete | Self::Failed)
    }
}

/// Which side of the pairing ceremony this device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Created the pairing payload.
    Initiator,
    /// Read the pairing payload.
    Responder,
}

/// A fatal session error, as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Machine-readable classification.
    pub kind: ErrorKind,
    /// Human label of the operation that failed (e.g. "decrypt batch").
    pub operation: String,
    /// Human-readable detail.
    pub message: String,
}

/// Events that can occur during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A pairing was started (either role).
    PairingStarted,
    /// Relay room joined.
    RoomJoined,
    /// Peer's key imported, shared key derived, peer device info stored.
    PeerKeyAccepted,
    /// Vector spaces compared.
    VectorSpaceChecked {
        /// Whether the two spaces are compatible.
        compatible: bool,
    },
    /// A peer batch was decrypted and buffered.
    BatchReceived {
        /// Total batches the peer declared for its transfer.
        total_batches: u32,
    },
    /// The merge pass over buffered batches finished.
    MergeFinished,
    /// Our own transfer (all batches plus `sync_done`) was sent.
    LocalTransferDone,
    /// The peer announced `sync_done`.
    RemoteTransferDone,
    /// A fatal error occurred.
    Failed(Failure),
    /// The host cancelled the session.
    CancelRequested,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send our own `key_exchange` (initiator answers the responder).
    SendKeyExchange,
    /// Start sending local batches.
    StartTransfer,
    /// Run the merge pass over all buffered peer batches.
    MergeBuffered,
    /// Publish a failure to the host.
    ReportFailure(Failure),
    /// Disconnect from the relay and drop key material.
    Teardown,
}

/// Session state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMachine {
    role: Role,
    state: SessionState,
    local_done: bool,
    remote_done: bool,
    batches_received: u32,
    expected_batches: Option<u32>,
    failure: Option<Failure>,
}

impl SessionMachine {
    /// Create a machine in the `Idle` state.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            local_done: false,
            remote_done: false,
            batches_received: 0,
            expected_batches: None,
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Role in the pairing.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of peer batches received so far.
    pub fn batches_received(&self) -> u32 {
        self.batches_received
    }

    /// Total batches the peer declared, once known.
    pub fn expected_batches(&self) -> Option<u32> {
        self.expected_batches
    }

    /// The failure that ended the session, if any.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Whether the session may complete.
    ///
    /// Both sides must have finished sending and at least one peer batch
    /// must have arrived.
    pub fn is_ready_to_complete(&self) -> bool {
        self.local_done && self.remote_done && self.batches_received >= 1
    }

    /// Process an event and return the new machine plus actions to execute.
    ///
    /// This is a pure function - no side effects. Events that make no sense
    /// in the current state leave the machine unchanged.
    pub fn on_event(mut self, event: Event) -> (Self, Vec<Action>) {
        use SessionState::*;

        let mut actions = Vec::new();
        match (self.state, event) {
            (Idle, Event::PairingStarted) => self.state = Initiating,
            (Initiating, Event::RoomJoined) => self.state = Waiting,

            (Waiting, Event::PeerKeyAccepted) => {
                self.state = Connected;
                if self.role == Role::Initiator {
                    actions.push(Action::SendKeyExchange);
                }
            }

            (Connected, Event::VectorSpaceChecked { compatible: true }) => {
                self.state = Syncing;
                actions.push(Action::StartTransfer);
            }
            (Connected, Event::VectorSpaceChecked { compatible: false }) => {
                self.fail(
                    Failure {
                        kind: ErrorKind::VectorIncompatible,
                        operation: "compare vector spaces".into(),
                        message: "devices use different embedding models".into(),
                    },
                    &mut actions,
                );
            }

            (Syncing, Event::BatchReceived { total_batches }) => {
                self.batches_received = self.batches_received.saturating_add(1);
                self.expected_batches = Some(total_batches);
                if self.batches_received == total_batches {
                    // Completion is re-checked once the merge pass reports back.
                    actions.push(Action::MergeBuffered);
                } else {
                    self.check_complete(&mut actions);
                }
            }
            (Syncing, Event::MergeFinished) => self.check_complete(&mut actions),
            (Syncing, Event::LocalTransferDone) => {
                self.local_done = true;
                self.check_complete(&mut actions);
            }
            (Syncing, Event::RemoteTransferDone) => {
                self.remote_done = true;
                self.check_complete(&mut actions);
            }

            (state, Event::Failed(failure)) if !state.is_terminal() && state != Idle => {
                self.fail(failure, &mut actions);
            }
            (state, Event::CancelRequested) if state.is_active() => {
                self.state = Idle;
                actions.push(Action::Teardown);
            }

            // Invalid transitions - stay in current state
            _ => {}
        }
        (self, actions)
    }

    fn fail(&mut self, failure: Failure, actions: &mut Vec<Action>) {
        self.state = SessionState::Failed;
        self.failure = Some(failure.clone());
        actions.push(Action::ReportFailure(failure));
        actions.push(Action::Teardown);
    }

    fn check_complete(&mut self, actions: &mut Vec<Action>) {
        if self.is_ready_to_complete() {
            self.state = SessionState::Complete;
            actions.push(Action::Teardown);
        }
    }
}
