//! RelayClient - typed access to one room on the relay.
//!
//! The client joins a room, sends [`RelayMessage`]s into it, and delivers
//! what the peer sends as ordered [`RelayEvent`]s. Two background tasks run
//! per client:
//!
//! - a reader that decodes frames, acknowledges batches, and reconnects
//!   (re-joining the room) when the connection drops unexpectedly
//! - a heartbeat that pings the relay on a fixed interval
//!
//! Both stop when [`RelayClient::disconnect`] is called.
//!
//! ```text
//! transport.recv() → reader ─┬→ batch_ack (auto)
//!                            └→ mpsc<RelayEvent> → session loop
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use sync_core::ReconnectPolicy;
use sync_types::{
    BatchAck, DeviceId, Envelope, ErrorKind, HistoryBatch, KeyExchange, MessageType,
    RelayMessage, RoomId,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::transport::Transport;

/// Capacity of the event channel between the reader and its consumer.
const EVENT_BUFFER: usize = 64;

/// Something the peer (or the connection) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// First message seen from a peer device.
    DeviceJoined {
        /// The peer.
        device_id: DeviceId,
    },
    /// Peer's public key and device description.
    KeyExchange {
        /// The peer.
        from: DeviceId,
        /// Key and device info.
        payload: KeyExchange,
    },
    /// One encrypted batch (already acknowledged).
    BatchReceived {
        /// The peer.
        from: DeviceId,
        /// Encrypted batch.
        batch: HistoryBatch,
    },
    /// Peer acknowledged one of our batches.
    BatchAck {
        /// The peer.
        from: DeviceId,
        /// Acknowledged batch.
        ack: BatchAck,
    },
    /// Peer finished sending.
    SyncComplete {
        /// The peer.
        from: DeviceId,
    },
    /// Peer-reported or connection-level error.
    Error {
        /// Classification.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
    /// Connection lost and not recovered.
    Disconnected {
        /// Why.
        reason: String,
    },
}

/// Connection state as seen by senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Connected and joined.
    Up,
    /// Connection lost, reconnect in progress.
    Reconnecting,
    /// Disconnected for good.
    Down,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Relay WebSocket URL.
    pub url: String,
    /// Room to join.
    pub room_id: RoomId,
    /// This device, used as `from` and to drop our own echoes.
    pub device_id: DeviceId,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
}

struct Shared<T> {
    transport: T,
    options: RelayOptions,
    link: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

/// Client for one relay room.
///
/// Cheap to clone; all clones share the connection.
pub struct RelayClient<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for RelayClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> std::fmt::Debug for RelayClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("room_id", &self.shared.options.room_id)
            .field("device_id", &self.shared.options.device_id)
            .field("link", &self.link_state())
            .finish()
    }
}

impl<T: Transport + 'static> RelayClient<T> {
    /// Connect, join the room, and start the reader and heartbeat tasks.
    ///
    /// The initial connection is attempted once; reconnection only applies
    /// to connections that were established and then lost.
    pub async fn connect(
        transport: T,
        options: RelayOptions,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), ClientError> {
        transport
            .connect(&options.url)
            .await
            .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?;

        let (link, _) = watch::channel(LinkState::Up);
        let client = Self {
            shared: Arc::new(Shared {
                transport,
                options,
                link,
                cancel: CancellationToken::new(),
            }),
        };
        client.send_now(&RelayMessage::Join).await?;
        tracing::info!(
            room = client.shared.options.room_id.as_str(),
            "joined relay room"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(client.clone().run_reader(events_tx));
        tokio::spawn(client.clone().run_heartbeat());
        Ok((client, events_rx))
    }
}

impl<T: Transport> RelayClient<T> {
    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        *self.shared.link.borrow()
    }

    /// The joined room.
    pub fn room_id(&self) -> &RoomId {
        &self.shared.options.room_id
    }

    /// This device.
    pub fn device_id(&self) -> &DeviceId {
        &self.shared.options.device_id
    }

    /// Send a message into the room.
    ///
    /// While a reconnect is in progress this waits for it to finish.
    pub async fn send(&self, message: &RelayMessage) -> Result<(), ClientError> {
        let mut link = self.shared.link.subscribe();
        loop {
            let state = *link.borrow_and_update();
            match state {
                LinkState::Up => break,
                LinkState::Down => {
                    return Err(ClientError::RelayUnavailable("relay connection is down".into()))
                }
                LinkState::Reconnecting => {}
            }
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    return Err(ClientError::RelayUnavailable("relay client disconnected".into()));
                }
                changed = link.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::RelayUnavailable("relay client dropped".into()));
                    }
                }
            }
        }
        self.send_now(message).await
    }

    /// Stop background tasks and close the connection. No reconnect follows.
    pub async fn disconnect(&self) {
        self.shared.cancel.cancel();
        self.shared.link.send_replace(LinkState::Down);
        if let Err(e) = self.shared.transport.close().await {
            tracing::debug!(error = %e, "close failed");
        }
    }

    async fn send_now(&self, message: &RelayMessage) -> Result<(), ClientError> {
        let options = &self.shared.options;
        let envelope = Envelope::new(options.room_id.clone(), options.device_id.clone(), message)?;
        self.shared.transport.send(envelope.to_json()?).await?;
        Ok(())
    }

    async fn run_reader(self, events: mpsc::Sender<RelayEvent>) {
        let mut peers = HashSet::new();
        loop {
            let frame = tokio::select! {
                _ = self.shared.cancel.cancelled() => return,
                frame = self.shared.transport.recv() => frame,
            };
            match frame {
                Ok(text) => {
                    if !self.handle_frame(&text, &mut peers, &events).await {
                        return;
                    }
                }
                Err(e) => {
                    if self.shared.cancel.is_cancelled() {
                        return;
                    }
                    tracing::warn!(error = %e, "relay connection lost");
                    if !self.reconnect(&events).await {
                        return;
                    }
                }
            }
        }
    }

    /// Decode one frame and forward it. Returns false once nobody listens.
    async fn handle_frame(
        &self,
        text: &str,
        peers: &mut HashSet<DeviceId>,
        events: &mpsc::Sender<RelayEvent>,
    ) -> bool {
        let options = &self.shared.options;
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable frame");
                return true;
            }
        };
        if envelope.from == options.device_id || envelope.room_id != options.room_id {
            return true;
        }
        if envelope.to.as_ref().is_some_and(|to| *to != options.device_id) {
            return true;
        }
        if !envelope.msg_type.is_relayed() || envelope.msg_type == MessageType::Pong {
            tracing::trace!(msg_type = envelope.msg_type.as_str(), "relay control frame");
            return true;
        }

        let from = envelope.from.clone();
        if peers.insert(from.clone()) {
            tracing::info!(peer = ?from, "peer joined room");
            let joined = RelayEvent::DeviceJoined {
                device_id: from.clone(),
            };
            if events.send(joined).await.is_err() {
                return false;
            }
        }

        let message = match envelope.message() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    msg_type = envelope.msg_type.as_str(),
                    error = %e,
                    "dropping malformed payload"
                );
                return true;
            }
        };

        let event = match message {
            RelayMessage::KeyExchange(payload) => RelayEvent::KeyExchange { from, payload },
            RelayMessage::HistoryBatch(batch) => {
                let ack = RelayMessage::BatchAck(BatchAck {
                    batch_id: batch.batch_id,
                    sequence: batch.sequence,
                });
                if let Err(e) = self.send_now(&ack).await {
                    tracing::warn!(sequence = batch.sequence, error = %e, "batch ack failed");
                }
                RelayEvent::BatchReceived { from, batch }
            }
            RelayMessage::BatchAck(ack) => RelayEvent::BatchAck { from, ack },
            RelayMessage::SyncDone => RelayEvent::SyncComplete { from },
            RelayMessage::Error(payload) => RelayEvent::Error {
                kind: ErrorKind::Protocol,
                message: payload.error,
            },
            RelayMessage::Join | RelayMessage::Ping | RelayMessage::Pong => return true,
        };
        events.send(event).await.is_ok()
    }

    /// Reconnect and re-join per the backoff policy. Returns false when the
    /// client should stop reading.
    async fn reconnect(&self, events: &mpsc::Sender<RelayEvent>) -> bool {
        let options = &self.shared.options;
        self.shared.link.send_replace(LinkState::Reconnecting);

        let mut attempt = 1;
        while let Some(delay) = options.reconnect.delay_for(attempt) {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            let result = match self.shared.transport.connect(&options.url).await {
                Ok(()) => self.send_now(&RelayMessage::Join).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected to relay");
                    self.shared.link.send_replace(LinkState::Up);
                    return true;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "reconnect failed"),
            }
            attempt += 1;
        }

        let attempts = options.reconnect.max_attempts;
        tracing::error!(attempts, "giving up on relay");
        self.shared.link.send_replace(LinkState::Down);
        let _ = events
            .send(RelayEvent::Disconnected {
                reason: format!("connection lost, {} reconnect attempts failed", attempts),
            })
            .await;
        let _ = events
            .send(RelayEvent::Error {
                kind: ErrorKind::RelayUnavailable,
                message: "relay unreachable".into(),
            })
            .await;
        false
    }

    async fn run_heartbeat(self) {
        let mut ticker = tokio::time::interval(self.shared.options.heartbeat_interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.link_state() != LinkState::Up {
                continue;
            }
            if let Err(e) = self.send_now(&RelayMessage::Ping).await {
                tracing::debug!(error = %e, "heartbeat ping failed");
            }
        }
    }
}
