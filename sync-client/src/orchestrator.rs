//! SyncOrchestrator - drives one pairing-and-sync session end to end.
//!
//! # Architecture
//!
//! The orchestrator owns at most one session. Each session runs as a task
//! with a single event loop; protocol decisions come from the pure
//! [`SessionMachine`] in sync-core and this module interprets its actions.
//!
//! ```text
//! RelayEvent ─┐
//! transfer ───┼→ session loop → SessionMachine → Action → relay / store / crypto
//! expiry ─────┘        │
//!                      └→ watch<SyncProgress>
//! ```
//!
//! The outgoing transfer runs in its own task so that peer batches keep
//! being processed while ours are sent.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::with_websocket(config, store, vectors, identity);
//! let payload = orchestrator.initiate_pairing().await?;
//! show_qr(&payload.to_json()?);
//!
//! let mut progress = orchestrator.progress();
//! while progress.changed().await.is_ok() {
//!     if progress.borrow().state.is_terminal() { break; }
//! }
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{
    chunk_into_batches, decode_batch, encode_batch, estimate_size, from_wire, merge,
    should_merge, Action, Event, Failure, PairingPayload, Role, SessionMachine, SessionState,
};
use sync_types::{
    now_millis, Batch, DeviceId, DeviceInfo, Digest, ErrorKind, ErrorPayload, HistoryBatch,
    KeyExchange, RelayMessage, RoomId,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::crypto::{
    decrypt, derive_shared_secret, encrypt, export_public_key, generate_key_pair,
    import_public_key, KeyPair, SharedKey,
};
use crate::error::ClientError;
use crate::relay::{LinkState, RelayClient, RelayEvent, RelayOptions};
use crate::store::{DeviceIdentityProvider, DigestStore, VectorMetadataProvider};
use crate::transport::{Transport, WebSocketTransport};

/// Snapshot of the current session, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncProgress {
    /// Session state.
    pub state: SessionState,
    /// Our side of the pairing, once a session exists.
    pub role: Option<Role>,
    /// Relay room of the session.
    pub room_id: Option<RoomId>,
    /// Peer device, once it has said something.
    pub peer_device_id: Option<DeviceId>,
    /// Batches we sent.
    pub batches_sent: u32,
    /// Batches we are going to send.
    pub batches_total: u32,
    /// Our batches the peer acknowledged.
    pub batches_acked: u32,
    /// Peer batches received.
    pub batches_received: u32,
    /// Peer batches announced.
    pub batches_expected: Option<u32>,
    /// Peer digests stored as new records.
    pub digests_saved: usize,
    /// Peer digests merged into existing records.
    pub digests_merged: usize,
    /// Peer digests that brought nothing new.
    pub digests_skipped: usize,
    /// Peer digests received but never merged because the session ended
    /// before their batch set was complete.
    pub digests_discarded: usize,
    /// Why the session failed.
    pub failure: Option<Failure>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            role: None,
            room_id: None,
            peer_device_id: None,
            batches_sent: 0,
            batches_total: 0,
            batches_acked: 0,
            batches_received: 0,
            batches_expected: None,
            digests_saved: 0,
            digests_merged: 0,
            digests_skipped: 0,
            digests_discarded: 0,
            failure: None,
        }
    }
}

/// A client error tagged with the operation that failed.
#[derive(Debug)]
struct OpError {
    operation: &'static str,
    error: ClientError,
}

impl OpError {
    fn failure(&self) -> Failure {
        Failure {
            kind: self.error.kind(),
            operation: self.operation.to_string(),
            message: self.error.to_string(),
        }
    }
}

trait During<T> {
    fn during(self, operation: &'static str) -> Result<T, OpError>;
}

impl<T, E: Into<ClientError>> During<T> for Result<T, E> {
    fn during(self, operation: &'static str) -> Result<T, OpError> {
        self.map_err(|e| OpError {
            operation,
            error: e.into(),
        })
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Pairs this device with a peer and synchronizes digests with it.
pub struct SyncOrchestrator<T: Transport> {
    config: SyncConfig,
    store: Arc<dyn DigestStore>,
    vectors: Arc<dyn VectorMetadataProvider>,
    identity: Arc<dyn DeviceIdentityProvider>,
    transports: Box<dyn Fn() -> T + Send + Sync>,
    progress: Arc<watch::Sender<SyncProgress>>,
    session: Mutex<Option<SessionHandle>>,
}

impl SyncOrchestrator<WebSocketTransport> {
    /// Create an orchestrator that talks to the relay over WebSocket.
    pub fn with_websocket(
        config: SyncConfig,
        store: Arc<dyn DigestStore>,
        vectors: Arc<dyn VectorMetadataProvider>,
        identity: Arc<dyn DeviceIdentityProvider>,
    ) -> Self {
        Self::new(config, store, vectors, identity, WebSocketTransport::new)
    }
}

impl<T: Transport + 'static> SyncOrchestrator<T> {
    /// Create an orchestrator. `transports` builds a fresh transport for
    /// every session.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn DigestStore>,
        vectors: Arc<dyn VectorMetadataProvider>,
        identity: Arc<dyn DeviceIdentityProvider>,
        transports: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            config,
            store,
            vectors,
            identity,
            transports: Box::new(transports),
            progress: Arc::new(progress),
            session: Mutex::new(None),
        }
    }

    /// Subscribe to session progress.
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.progress.borrow().state
    }

    /// Start a session as the initiator.
    ///
    /// Cancels any active session, generates a key pair, joins a fresh relay
    /// room and returns the payload to show the other device. The session
    /// then waits for the peer until the payload expires.
    pub async fn initiate_pairing(&self) -> Result<PairingPayload, ClientError> {
        let mut slot = self.session.lock().await;
        stop_session(slot.take()).await;

        let machine = self.begin(Role::Initiator);
        match self.open_initiator().await {
            Ok((payload, parts)) => {
                tracing::info!(room = payload.room_id.as_str(), "pairing initiated");
                *slot = Some(self.spawn(machine, parts));
                Ok(payload)
            }
            Err(e) => Err(self.abort(machine, e)),
        }
    }

    /// Start a session as the responder, from a payload shown by the
    /// initiator.
    pub async fn accept_pairing(&self, payload: &PairingPayload) -> Result<(), ClientError> {
        let mut slot = self.session.lock().await;
        stop_session(slot.take()).await;

        let machine = self.begin(Role::Responder);
        match self.open_responder(payload).await {
            Ok(parts) => {
                tracing::info!(room = payload.room_id.as_str(), "pairing accepted");
                *slot = Some(self.spawn(machine, parts));
                Ok(())
            }
            Err(e) => Err(self.abort(machine, e)),
        }
    }

    /// Cancel the active session, if any.
    ///
    /// Disconnects from the relay and drops all session key material before
    /// returning.
    pub async fn cancel_sync(&self) {
        let mut slot = self.session.lock().await;
        stop_session(slot.take()).await;
    }

    fn begin(&self, role: Role) -> SessionMachine {
        let (machine, _) = SessionMachine::new(role).on_event(Event::PairingStarted);
        self.progress.send_replace(SyncProgress {
            state: machine.state(),
            role: Some(role),
            ..SyncProgress::default()
        });
        machine
    }

    /// Fail a session that never got its task.
    fn abort(&self, machine: SessionMachine, error: OpError) -> ClientError {
        let failure = error.failure();
        tracing::error!(
            operation = error.operation,
            kind = %failure.kind,
            error = %error.error,
            "pairing failed"
        );
        let (machine, _) = machine.on_event(Event::Failed(failure));
        self.progress.send_modify(|p| {
            p.state = machine.state();
            p.failure = machine.failure().cloned();
        });
        error.error
    }

    async fn local_device_info(&self) -> DeviceInfo {
        let mut info = self.identity.device_info().await;
        info.vector_space = self.vectors.vector_space().await;
        info.last_seen = now_millis();
        info
    }

    fn relay_options(&self, url: &str, room_id: &RoomId, device_id: &DeviceId) -> RelayOptions {
        RelayOptions {
            url: url.to_string(),
            room_id: room_id.clone(),
            device_id: device_id.clone(),
            heartbeat_interval: self.config.heartbeat_interval(),
            reconnect: self.config.reconnect_policy(),
        }
    }

    async fn open_initiator(&self) -> Result<(PairingPayload, SessionParts<T>), OpError> {
        self.config.validate().during("validate config")?;
        let local = self.local_device_info().await;
        let key_pair = generate_key_pair().during("generate key pair")?;
        let public_key = export_public_key(key_pair.public_key()).during("export public key")?;
        let payload = PairingPayload::create_with_ttl(
            local.device_id.clone(),
            self.config.relay_url.as_str(),
            public_key.clone(),
            self.config.pairing_ttl(),
        );

        let options = self.relay_options(&payload.signaling_url, &payload.room_id, &local.device_id);
        let (relay, events) = RelayClient::connect((self.transports)(), options)
            .await
            .during("join relay room")?;

        let parts = SessionParts {
            relay,
            events,
            keys: SessionKeys::AwaitingPeer(key_pair),
            local,
            local_public_key: public_key,
            room_id: payload.room_id.clone(),
            expires_at: payload.expires_at,
        };
        Ok((payload, parts))
    }

    async fn open_responder(&self, payload: &PairingPayload) -> Result<SessionParts<T>, OpError> {
        self.config.validate().during("validate config")?;
        payload.validate().during("validate pairing payload")?;
        let peer_key = import_public_key(&payload.public_key).during("import peer key")?;
        let local = self.local_device_info().await;

        let key_pair = generate_key_pair().during("generate key pair")?;
        let public_key = export_public_key(key_pair.public_key()).during("export public key")?;
        let shared = derive_shared_secret(&key_pair, &peer_key).during("derive shared key")?;
        drop(key_pair);

        let options = self.relay_options(&payload.signaling_url, &payload.room_id, &local.device_id);
        let (relay, events) = RelayClient::connect((self.transports)(), options)
            .await
            .during("join relay room")?;

        Ok(SessionParts {
            relay,
            events,
            keys: SessionKeys::Derived {
                shared,
                peer_key: payload.public_key.clone(),
            },
            local,
            local_public_key: public_key,
            room_id: payload.room_id.clone(),
            expires_at: payload.expires_at,
        })
    }

    fn spawn(&self, machine: SessionMachine, parts: SessionParts<T>) -> SessionHandle {
        let (machine, _) = machine.on_event(Event::RoomJoined);
        let cancel = CancellationToken::new();
        let (transfer_tx, transfer_rx) = mpsc::channel(1);

        self.progress.send_modify(|p| {
            p.state = machine.state();
            p.room_id = Some(parts.room_id.clone());
        });

        let session = Session {
            machine,
            relay: parts.relay,
            events: parts.events,
            keys: parts.keys,
            local: parts.local,
            local_public_key: parts.local_public_key,
            expires_at: parts.expires_at,
            buffered: Vec::new(),
            stats: MergeStats::default(),
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            progress: Arc::clone(&self.progress),
            cancel: cancel.clone(),
            transfer_cancel: cancel.child_token(),
            transfer_tx,
            transfer_rx,
        };
        SessionHandle {
            cancel,
            task: tokio::spawn(session.run()),
        }
    }
}

async fn stop_session(handle: Option<SessionHandle>) {
    if let Some(handle) = handle {
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "session task ended abnormally");
        }
    }
}

/// Everything a session needs from setup.
struct SessionParts<T: Transport> {
    relay: RelayClient<T>,
    events: mpsc::Receiver<RelayEvent>,
    keys: SessionKeys,
    local: DeviceInfo,
    local_public_key: String,
    room_id: RoomId,
    expires_at: u64,
}

/// Key material for one session. Never leaves memory.
enum SessionKeys {
    /// Initiator, before the peer's key arrived.
    AwaitingPeer(KeyPair),
    /// Shared key derived; `peer_key` is the peer's exported public key.
    Derived { shared: SharedKey, peer_key: String },
    /// Torn down.
    Dropped,
}

#[derive(Debug, Default, Clone, Copy)]
struct MergeStats {
    saved: usize,
    merged: usize,
    skipped: usize,
    discarded: usize,
}

enum TransferOutcome {
    Sent,
    Failed(Failure),
}

struct Session<T: Transport> {
    machine: SessionMachine,
    relay: RelayClient<T>,
    events: mpsc::Receiver<RelayEvent>,
    keys: SessionKeys,
    local: DeviceInfo,
    local_public_key: String,
    expires_at: u64,
    buffered: Vec<Batch>,
    stats: MergeStats,
    config: SyncConfig,
    store: Arc<dyn DigestStore>,
    progress: Arc<watch::Sender<SyncProgress>>,
    cancel: CancellationToken,
    transfer_cancel: CancellationToken,
    transfer_tx: mpsc::Sender<TransferOutcome>,
    transfer_rx: mpsc::Receiver<TransferOutcome>,
}

impl<T: Transport + 'static> Session<T> {
    async fn run(mut self) {
        if self.machine.role() == Role::Responder {
            if let Err(e) = self.send_key_exchange().await {
                self.dispatch(Event::Failed(e.failure())).await;
            }
        }

        let until_expiry = Duration::from_millis(self.expires_at.saturating_sub(now_millis()));
        let expiry = tokio::time::sleep(until_expiry);
        tokio::pin!(expiry);

        while self.machine.state().is_active() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("session cancelled");
                    self.dispatch(Event::CancelRequested).await;
                }
                Some(outcome) = self.transfer_rx.recv() => match outcome {
                    TransferOutcome::Sent => self.dispatch(Event::LocalTransferDone).await,
                    TransferOutcome::Failed(failure) => {
                        self.dispatch(Event::Failed(failure)).await
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => self.on_relay_event(event).await,
                    None => {
                        let failure = Failure {
                            kind: ErrorKind::RelayUnavailable,
                            operation: "receive relay events".into(),
                            message: "relay event stream closed".into(),
                        };
                        self.dispatch(Event::Failed(failure)).await;
                    }
                },
                _ = &mut expiry, if self.machine.state() == SessionState::Waiting => {
                    let failure = Failure {
                        kind: ErrorKind::SessionExpired,
                        operation: "wait for peer".into(),
                        message: "pairing payload expired before the peer answered".into(),
                    };
                    self.dispatch(Event::Failed(failure)).await;
                }
            }
        }
        tracing::debug!(state = ?self.machine.state(), "session finished");
    }

    /// Feed one event to the machine and execute the resulting actions.
    async fn dispatch(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let before = self.machine.state();
            let (machine, actions) = self.machine.clone().on_event(event);
            self.machine = machine;
            if before != self.machine.state() {
                tracing::debug!(from = ?before, to = ?self.machine.state(), "session state");
            }
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    pending.push_back(follow_up);
                }
            }
            self.publish();
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::SendKeyExchange => self
                .send_key_exchange()
                .await
                .err()
                .map(|e| Event::Failed(e.failure())),
            Action::StartTransfer => self.start_transfer().err().map(|e| Event::Failed(e.failure())),
            Action::MergeBuffered => match self.merge_buffered().await {
                Ok(()) => Some(Event::MergeFinished),
                Err(e) => Some(Event::Failed(e.failure())),
            },
            Action::ReportFailure(failure) => {
                self.report_failure(&failure).await;
                None
            }
            Action::Teardown => {
                self.teardown().await;
                None
            }
        }
    }

    fn publish(&self) {
        let machine = &self.machine;
        let stats = self.stats;
        self.progress.send_modify(|p| {
            p.state = machine.state();
            p.batches_received = machine.batches_received();
            p.batches_expected = machine.expected_batches();
            p.digests_saved = stats.saved;
            p.digests_merged = stats.merged;
            p.digests_skipped = stats.skipped;
            p.digests_discarded = stats.discarded;
            p.failure = machine.failure().cloned();
        });
    }

    async fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::DeviceJoined { device_id } => {
                tracing::debug!(peer = ?device_id, "peer present");
                self.progress
                    .send_modify(|p| p.peer_device_id = Some(device_id));
            }
            RelayEvent::KeyExchange { from, payload } => self.on_key_exchange(from, payload).await,
            RelayEvent::BatchReceived { from, batch } => self.on_batch(from, batch).await,
            RelayEvent::BatchAck { ack, .. } => {
                tracing::trace!(sequence = ack.sequence, "batch acknowledged");
                self.progress.send_modify(|p| p.batches_acked += 1);
            }
            RelayEvent::SyncComplete { .. } => self.dispatch(Event::RemoteTransferDone).await,
            RelayEvent::Error { kind, message } => {
                let failure = Failure {
                    kind,
                    operation: "relay session".into(),
                    message,
                };
                self.dispatch(Event::Failed(failure)).await;
            }
            RelayEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "relay disconnected");
            }
        }
    }

    async fn on_key_exchange(&mut self, from: DeviceId, payload: KeyExchange) {
        if self.machine.state() != SessionState::Waiting {
            tracing::debug!(peer = ?from, "ignoring repeated key exchange");
            return;
        }
        if let Err(e) = self.accept_peer_key(&payload.public_key) {
            return self.dispatch(Event::Failed(e.failure())).await;
        }
        self.dispatch(Event::PeerKeyAccepted).await;

        let remote = payload.device_info;
        let compatible = self.local.is_vector_compatible(&remote);
        if !compatible {
            tracing::warn!(
                local_model = %self.local.vector_space.model,
                local_dimension = self.local.vector_space.dimension,
                remote_model = %remote.vector_space.model,
                remote_dimension = remote.vector_space.dimension,
                "vector spaces differ"
            );
        }
        self.dispatch(Event::VectorSpaceChecked { compatible }).await;
    }

    /// Derive (initiator) or confirm (responder) the shared key.
    fn accept_peer_key(&mut self, peer_public_key: &str) -> Result<(), OpError> {
        let shared = match std::mem::replace(&mut self.keys, SessionKeys::Dropped) {
            SessionKeys::AwaitingPeer(key_pair) => {
                let peer = import_public_key(peer_public_key).during("import peer key")?;
                derive_shared_secret(&key_pair, &peer).during("derive shared key")?
            }
            SessionKeys::Derived { shared, peer_key } => {
                if peer_key != peer_public_key {
                    return Err(ClientError::Protocol(
                        "peer key does not match the pairing payload".into(),
                    ))
                    .during("verify peer key");
                }
                shared
            }
            SessionKeys::Dropped => {
                return Err(ClientError::Protocol("session keys already dropped".into()))
                    .during("derive shared key")
            }
        };
        self.keys = SessionKeys::Derived {
            shared,
            peer_key: peer_public_key.to_string(),
        };
        Ok(())
    }

    async fn send_key_exchange(&self) -> Result<(), OpError> {
        let message = RelayMessage::KeyExchange(KeyExchange {
            public_key: self.local_public_key.clone(),
            device_info: self.local.clone(),
        });
        self.relay.send(&message).await.during("send key exchange")
    }

    async fn on_batch(&mut self, from: DeviceId, batch: HistoryBatch) {
        if self.machine.state() != SessionState::Syncing {
            tracing::debug!(peer = ?from, sequence = batch.sequence, "ignoring early batch");
            return;
        }
        let batch = match self.open_batch(&batch) {
            Ok(batch) => batch,
            Err(e) => return self.dispatch(Event::Failed(e.failure())).await,
        };
        if batch.source_device_id != from {
            tracing::warn!(peer = ?from, source = ?batch.source_device_id, "batch source differs from sender");
        }
        tracing::debug!(
            sequence = batch.sequence,
            total = batch.total_batches,
            digests = batch.digests.len(),
            "batch received"
        );
        let total_batches = batch.total_batches;
        self.buffered.push(batch);
        self.dispatch(Event::BatchReceived { total_batches }).await;
    }

    fn open_batch(&self, batch: &HistoryBatch) -> Result<Batch, OpError> {
        let SessionKeys::Derived { shared, .. } = &self.keys else {
            return Err(ClientError::Protocol("no shared key".into())).during("decrypt batch");
        };
        let plaintext = decrypt(&batch.encrypted_batch, shared).during("decrypt batch")?;
        decode_batch(&plaintext).during("decode batch")
    }

    async fn merge_buffered(&mut self) -> Result<(), OpError> {
        let now = now_millis();
        let mut pending: BTreeMap<String, Digest> = BTreeMap::new();
        for batch in std::mem::take(&mut self.buffered) {
            for wire in batch.digests {
                let mut remote = from_wire(wire).during("decode digest")?;
                remote.source_devices.insert(batch.source_device_id.clone());

                let local = match pending.get(&remote.url) {
                    Some(digest) => Some(digest.clone()),
                    None => self.store.get_by_url(&remote.url).await.during("load digest")?,
                };
                match local {
                    None => {
                        self.stats.saved += 1;
                        pending.insert(remote.url.clone(), remote);
                    }
                    Some(local) if should_merge(&local, &remote) => {
                        let merged = merge(&local, &remote, now).during("merge digest")?;
                        self.stats.merged += 1;
                        pending.insert(merged.url.clone(), merged);
                    }
                    Some(_) => self.stats.skipped += 1,
                }
            }
        }
        self.store
            .save_all(pending.into_values().collect())
            .await
            .during("save digests")?;
        tracing::info!(
            saved = self.stats.saved,
            merged = self.stats.merged,
            skipped = self.stats.skipped,
            "merge pass finished"
        );
        Ok(())
    }

    fn start_transfer(&self) -> Result<(), OpError> {
        let SessionKeys::Derived { shared, .. } = &self.keys else {
            return Err(ClientError::Protocol("no shared key".into())).during("start transfer");
        };
        let transfer = Transfer {
            relay: self.relay.clone(),
            store: Arc::clone(&self.store),
            key: shared.clone(),
            config: self.config.clone(),
            device_id: self.local.device_id.clone(),
            progress: Arc::clone(&self.progress),
            cancel: self.transfer_cancel.clone(),
        };
        let outcomes = self.transfer_tx.clone();
        tokio::spawn(async move {
            let outcome = match transfer.run().await {
                Ok(true) => TransferOutcome::Sent,
                Ok(false) => return,
                Err(e) => TransferOutcome::Failed(e.failure()),
            };
            // The session may already be gone.
            let _ = outcomes.send(outcome).await;
        });
        Ok(())
    }

    async fn report_failure(&self, failure: &Failure) {
        tracing::error!(
            operation = %failure.operation,
            kind = %failure.kind,
            message = %failure.message,
            "sync session failed"
        );
        if self.relay.link_state() != LinkState::Up {
            return;
        }
        let notice = RelayMessage::Error(ErrorPayload {
            error: format!("{}: {}", failure.operation, failure.message),
        });
        if let Err(e) = self.relay.send(&notice).await {
            tracing::debug!(error = %e, "could not notify peer");
        }
    }

    async fn teardown(&mut self) {
        self.transfer_cancel.cancel();
        self.relay.disconnect().await;
        self.keys = SessionKeys::Dropped;
        let discarded: usize = self.buffered.iter().map(|b| b.digests.len()).sum();
        if discarded > 0 {
            self.stats.discarded += discarded;
            if self.machine.state() == SessionState::Complete {
                tracing::warn!(
                    discarded,
                    received = self.machine.batches_received(),
                    expected = ?self.machine.expected_batches(),
                    "peer finished before all batches arrived, discarding partial history"
                );
            } else {
                tracing::debug!(discarded, "dropping unmerged batches");
            }
        }
        self.buffered.clear();
        tracing::debug!("session torn down");
    }
}

/// The outgoing half of a session.
struct Transfer<T: Transport> {
    relay: RelayClient<T>,
    store: Arc<dyn DigestStore>,
    key: SharedKey,
    config: SyncConfig,
    device_id: DeviceId,
    progress: Arc<watch::Sender<SyncProgress>>,
    cancel: CancellationToken,
}

impl<T: Transport> Transfer<T> {
    /// Send the most recent digests, then `sync_done`. Returns false if
    /// cancelled midway.
    async fn run(self) -> Result<bool, OpError> {
        let mut digests = self.store.list_all().await.during("load digests")?;
        digests.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        digests.truncate(self.config.max_digests);

        let batches = chunk_into_batches(&digests, self.config.page_size, &self.device_id)
            .during("chunk digests")?;
        let total = batches.first().map_or(0, |b| b.total_batches);
        self.progress.send_modify(|p| {
            p.batches_total = total;
            p.batches_sent = 0;
        });
        tracing::info!(digests = digests.len(), batches = total, "sending history");

        for batch in &batches {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let plaintext = encode_batch(batch).during("encode batch")?;
            let encrypted_batch = encrypt(&plaintext, &self.key).during("encrypt batch")?;
            let message = RelayMessage::HistoryBatch(HistoryBatch {
                encrypted_batch,
                batch_id: batch.batch_id,
                sequence: batch.sequence,
                total_batches: batch.total_batches,
            });
            self.relay.send(&message).await.during("send batch")?;
            self.progress.send_modify(|p| p.batches_sent += 1);
            tracing::debug!(
                sequence = batch.sequence,
                bytes = estimate_size(batch),
                "batch sent"
            );

            if !batch.is_last() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(false),
                    _ = tokio::time::sleep(self.config.batch_delay()) => {}
                }
            }
        }

        self.relay
            .send(&RelayMessage::SyncDone)
            .await
            .during("send sync done")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDigestStore;
    use crate::transport::{MockRelay, MockTransport};
    use sync_types::{DeviceClass, Digest, Envelope, MessageType, VectorSpace};

    fn device(id: &str, space: VectorSpace) -> DeviceInfo {
        DeviceInfo {
            device_id: DeviceId::new(id),
            name: format!("{} laptop", id),
            device_class: DeviceClass::Desktop,
            platform: "linux".into(),
            agent: "test".into(),
            app_version: "1.0.0".into(),
            vector_space: space,
            last_seen: 0,
            paired_at: None,
        }
    }

    fn space() -> VectorSpace {
        VectorSpace::new("all-MiniLM-L6-v2", 384, "onnx")
    }

    fn orchestrator(
        relay: &MockRelay,
        id: &str,
        store: Arc<MemoryDigestStore>,
        vectors: VectorSpace,
    ) -> SyncOrchestrator<MockTransport> {
        let relay = relay.clone();
        let config = SyncConfig::new("mock://relay").with_batch_delay(Duration::ZERO);
        SyncOrchestrator::new(
            config,
            store,
            Arc::new(vectors.clone()),
            Arc::new(device(id, vectors)),
            move || MockTransport::new(relay.clone()),
        )
    }

    async fn wait_for(
        progress: &mut watch::Receiver<SyncProgress>,
        done: impl Fn(&SyncProgress) -> bool,
    ) -> SyncProgress {
        loop {
            {
                let current = progress.borrow_and_update();
                if done(&current) {
                    return current.clone();
                }
            }
            progress.changed().await.unwrap();
        }
    }

    // ===========================================
    // Initiator Setup Tests
    // ===========================================

    #[tokio::test]
    async fn initiate_pairing_waits_in_room() {
        let relay = MockRelay::new();
        let orch = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());

        let payload = orch.initiate_pairing().await.unwrap();

        assert_eq!(orch.state(), SessionState::Waiting);
        assert_eq!(payload.device_id, DeviceId::new("a"));
        assert_eq!(payload.signaling_url, "mock://relay");
        assert!(payload.validate().is_ok());
        assert_eq!(relay.room_size(payload.room_id.as_str()), 1);
        assert_eq!(orch.progress().borrow().role, Some(Role::Initiator));
    }

    #[tokio::test]
    async fn new_pairing_replaces_old_session() {
        let relay = MockRelay::new();
        let orch = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());

        let first = orch.initiate_pairing().await.unwrap();
        let second = orch.initiate_pairing().await.unwrap();

        assert_ne!(first.room_id, second.room_id);
        assert_eq!(relay.room_size(first.room_id.as_str()), 0);
        assert_eq!(relay.room_size(second.room_id.as_str()), 1);
    }

    #[tokio::test]
    async fn cancel_returns_to_idle_and_leaves_room() {
        let relay = MockRelay::new();
        let orch = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());
        let payload = orch.initiate_pairing().await.unwrap();

        orch.cancel_sync().await;

        assert_eq!(orch.state(), SessionState::Idle);
        assert_eq!(relay.room_size(payload.room_id.as_str()), 0);
        assert!(orch.progress().borrow().failure.is_none());
    }

    #[tokio::test]
    async fn unreachable_relay_fails_setup() {
        let relay = MockRelay::new();
        relay.refuse_connections(true);
        let orch = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());

        let err = orch.initiate_pairing().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RelayUnavailable);
        let progress = orch.progress().borrow().clone();
        assert_eq!(progress.state, SessionState::Failed);
        assert_eq!(progress.failure.unwrap().operation, "join relay room");
    }

    #[tokio::test]
    async fn zero_page_size_fails_before_connecting() {
        let relay = MockRelay::new();
        let orch = SyncOrchestrator::new(
            SyncConfig::new("mock://relay").with_page_size(0),
            Arc::new(MemoryDigestStore::new()),
            Arc::new(space()),
            Arc::new(device("a", space())),
            {
                let relay = relay.clone();
                move || MockTransport::new(relay.clone())
            },
        );

        let err = orch.initiate_pairing().await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Config(crate::config::ConfigError::InvalidValue(_))
        ));
        assert_eq!(relay.connection_count(), 0);
        let progress = orch.progress().borrow().clone();
        assert_eq!(progress.state, SessionState::Failed);
        assert_eq!(progress.failure.unwrap().operation, "validate config");
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_pairing_expires() {
        let relay = MockRelay::new();
        let orch = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());
        let mut progress = orch.progress();
        orch.initiate_pairing().await.unwrap();

        let last = wait_for(&mut progress, |p| p.state.is_terminal()).await;

        assert_eq!(last.state, SessionState::Failed);
        assert_eq!(last.failure.unwrap().kind, ErrorKind::SessionExpired);
    }

    // ===========================================
    // Responder Setup Tests
    // ===========================================

    #[tokio::test]
    async fn expired_payload_is_rejected() {
        let relay = MockRelay::new();
        let initiator = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());
        let responder = orchestrator(&relay, "b", Arc::new(MemoryDigestStore::new()), space());

        let mut payload = initiator.initiate_pairing().await.unwrap();
        payload.expires_at = now_millis() - 1;

        let err = responder.accept_pairing(&payload).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionExpired);
        assert_eq!(responder.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn malformed_payload_key_is_rejected() {
        let relay = MockRelay::new();
        let initiator = orchestrator(&relay, "a", Arc::new(MemoryDigestStore::new()), space());
        let responder = orchestrator(&relay, "b", Arc::new(MemoryDigestStore::new()), space());

        let mut payload = initiator.initiate_pairing().await.unwrap();
        payload.public_key = "bm90IGEga2V5".into();

        let err = responder.accept_pairing(&payload).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedKey);
        assert_eq!(relay.room_size(payload.room_id.as_str()), 1);
    }

    // ===========================================
    // Session Tests
    // ===========================================

    #[tokio::test]
    async fn incompatible_vector_spaces_fail_before_any_batch() {
        let relay = MockRelay::new();
        let store_a = Arc::new(MemoryDigestStore::with_digests([Digest::new(
            "https://example.com/a",
            "example.com",
            1_000,
        )]));
        let store_b = Arc::new(MemoryDigestStore::with_digests([Digest::new(
            "https://example.com/b",
            "example.com",
            2_000,
        )]));
        let initiator = orchestrator(&relay, "a", store_a, space());
        let responder = orchestrator(
            &relay,
            "b",
            store_b,
            VectorSpace::new("text-embedding-3-small", 1536, "api"),
        );
        let mut a_progress = initiator.progress();
        let mut b_progress = responder.progress();

        let payload = initiator.initiate_pairing().await.unwrap();
        responder.accept_pairing(&payload).await.unwrap();

        let a = wait_for(&mut a_progress, |p| p.state.is_terminal()).await;
        let b = wait_for(&mut b_progress, |p| p.state.is_terminal()).await;

        assert_eq!(a.state, SessionState::Failed);
        assert_eq!(a.failure.unwrap().kind, ErrorKind::VectorIncompatible);
        assert_eq!(b.state, SessionState::Failed);
        assert_eq!(relay.relayed_count(MessageType::HistoryBatch), 0);
    }

    #[tokio::test]
    async fn batches_on_the_wire_are_encrypted() {
        let relay = MockRelay::new();
        let mut digest = Digest::new("https://example.com/secret", "example.com", 1_000);
        digest.title = "very private title".into();
        let initiator = orchestrator(
            &relay,
            "a",
            Arc::new(MemoryDigestStore::with_digests([digest])),
            space(),
        );
        let responder = orchestrator(&relay, "b", Arc::new(MemoryDigestStore::new()), space());
        let mut b_progress = responder.progress();

        let payload = initiator.initiate_pairing().await.unwrap();
        responder.accept_pairing(&payload).await.unwrap();
        wait_for(&mut b_progress, |p| p.batches_received == 1).await;

        let batches: Vec<Envelope> = relay
            .relayed()
            .into_iter()
            .filter(|e| e.msg_type == MessageType::HistoryBatch)
            .collect();
        assert!(!batches.is_empty());
        for envelope in batches {
            let text = envelope.to_json().unwrap();
            assert!(!text.contains("very private title"));
            assert!(!text.contains("https://example.com/secret"));
        }
    }
}
