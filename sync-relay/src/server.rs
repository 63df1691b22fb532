//! Main SyncRelay server coordination.
//!
//! SyncRelay tracks live connections and the rooms they joined, and routes
//! envelopes between room members. It never looks inside payloads.

use crate::config::Config;
use crate::error::{ProtocolError, ProtocolResult};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sync_types::{DeviceId, Envelope, MessageType, RelayMessage, RoomId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

/// Identifier the relay assigns to each WebSocket connection.
pub type ConnectionId = u64;

/// Device id the relay uses as the sender of its own replies.
pub const RELAY_DEVICE_ID: &str = "relay";

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total text frames received from clients.
    pub frames_received: AtomicU64,
    /// Total messages forwarded (one per sender, not per recipient).
    pub messages_relayed: AtomicU64,
    /// Total frame deliveries to recipients.
    pub deliveries_total: AtomicU64,
    /// Total rooms created by a first join.
    pub rooms_created: AtomicU64,
    /// Total rooms deleted after the inactivity timeout.
    pub rooms_expired: AtomicU64,
    /// Total connections terminated for missing a heartbeat.
    pub heartbeat_timeouts: AtomicU64,
    /// Total protocol errors (undecodable frames, messages outside a room).
    pub errors_total: AtomicU64,
    /// Total connections dropped because their outbox was full.
    pub slow_consumers_dropped: AtomicU64,
}

/// A live connection.
#[derive(Debug)]
struct Peer {
    /// Frames queued for the connection's writer.
    outbox: mpsc::Sender<String>,
    /// Room the connection has joined, if any.
    room: Option<RoomId>,
}

/// Members of one room.
#[derive(Debug)]
struct Room {
    members: HashSet<ConnectionId>,
    last_activity: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            last_activity: Instant::now(),
        }
    }
}

/// Main relay server.
///
/// Connection and room entries live in separate maps. No code path holds a
/// guard into one map while locking the other.
pub struct SyncRelay {
    config: Config,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Peer>,
    rooms: DashMap<RoomId, Room>,
}

impl std::fmt::Debug for SyncRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRelay")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("connections_count", &self.connections.len())
            .field("rooms_count", &self.rooms.len())
            .finish_non_exhaustive()
    }
}

impl SyncRelay {
    /// Create a new SyncRelay with the given config.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            metrics: RelayMetrics::default(),
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Register a connection whose outgoing frames go to `outbox`.
    ///
    /// A connection whose outbox is full when a frame is routed to it is
    /// unregistered. Dropping the sender ends its session.
    pub fn register(&self, outbox: mpsc::Sender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, Peer { outbox, room: None });
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn = id, "connection registered");
        id
    }

    /// Remove a connection and its room membership.
    ///
    /// A room left without members is deleted.
    pub fn unregister(&self, id: ConnectionId) {
        let Some((_, peer)) = self.connections.remove(&id) else {
            return;
        };
        if let Some(room_id) = peer.room {
            self.leave_room(id, &room_id);
        }
        tracing::debug!(conn = id, "connection unregistered");
    }

    /// Handle one text frame from connection `id`.
    ///
    /// `join` moves the connection into the envelope's room and restarts the
    /// room's inactivity timer. `ping` is answered with `pong`. Every other
    /// message is forwarded unchanged to the other members of the room.
    pub fn handle_frame(&self, id: ConnectionId, text: &str) -> ProtocolResult<()> {
        self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);

        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let result = match envelope.msg_type {
            MessageType::Join => self.join(id, &envelope.room_id),
            MessageType::Ping => self.reply_pong(id, &envelope),
            _ => self.relay(id, &envelope.room_id, text),
        };
        if result.is_err() {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn join(&self, id: ConnectionId, room_id: &RoomId) -> ProtocolResult<()> {
        let previous = {
            let mut peer = self
                .connections
                .get_mut(&id)
                .ok_or(ProtocolError::UnknownConnection(id))?;
            peer.room.replace(room_id.clone())
        };
        if let Some(previous) = previous.filter(|p| p != room_id) {
            self.leave_room(id, &previous);
        }

        let mut room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            self.metrics.rooms_created.fetch_add(1, Ordering::Relaxed);
            Room::new()
        });
        room.members.insert(id);
        room.last_activity = Instant::now();

        tracing::debug!(
            conn = id,
            room = room_id.as_str(),
            members = room.members.len(),
            "joined room"
        );
        Ok(())
    }

    fn reply_pong(&self, id: ConnectionId, ping: &Envelope) -> ProtocolResult<()> {
        let pong = Envelope::new(
            ping.room_id.clone(),
            DeviceId::new(RELAY_DEVICE_ID),
            &RelayMessage::Pong,
        )
        .map_err(ProtocolError::Serialization)?
        .with_recipient(ping.from.clone());
        let frame = pong.to_json().map_err(ProtocolError::Serialization)?;

        if !self.connections.contains_key(&id) {
            return Err(ProtocolError::UnknownConnection(id));
        }
        self.deliver(id, frame);
        Ok(())
    }

    fn relay(&self, id: ConnectionId, room_id: &RoomId, text: &str) -> ProtocolResult<()> {
        let recipients: Vec<ConnectionId> = {
            let mut room = self
                .rooms
                .get_mut(room_id)
                .filter(|room| room.members.contains(&id))
                .ok_or_else(|| ProtocolError::NotInRoom {
                    room_id: room_id.to_string(),
                })?;
            room.last_activity = Instant::now();
            room.members.iter().copied().filter(|m| *m != id).collect()
        };

        let mut delivered = 0u64;
        for member in recipients {
            if self.deliver(member, text.to_string()) {
                delivered += 1;
            }
        }

        self.metrics.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .deliveries_total
            .fetch_add(delivered, Ordering::Relaxed);
        Ok(())
    }

    /// Queue `frame` for connection `id`. Returns whether it was queued.
    fn deliver(&self, id: ConnectionId, frame: String) -> bool {
        let result = match self.connections.get(&id) {
            Some(peer) => peer.outbox.try_send(frame),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.slow_consumers_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(conn = id, "outbox full, dropping slow connection");
                self.unregister(id);
                false
            }
            // A closed outbox means the connection is already shutting down.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn leave_room(&self, id: ConnectionId, room_id: &RoomId) {
        let now_empty = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.members.remove(&id);
                room.members.is_empty()
            }
            None => false,
        };
        if now_empty && self.rooms.remove_if(room_id, |_, r| r.members.is_empty()).is_some() {
            tracing::debug!(room = room_id.as_str(), "room deleted");
        }
    }

    /// Delete rooms that saw no join or relayed message for `timeout`.
    ///
    /// Members of an expired room stay connected but no longer belong to any
    /// room. Returns the number of rooms deleted.
    pub fn expire_idle_rooms(&self, timeout: Duration) -> usize {
        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|room| room.last_activity.elapsed() >= timeout)
            .map(|room| room.key().clone())
            .collect();

        let mut expired = 0;
        for room_id in idle {
            let Some((_, room)) = self
                .rooms
                .remove_if(&room_id, |_, r| r.last_activity.elapsed() >= timeout)
            else {
                continue;
            };
            for member in room.members {
                if let Some(mut peer) = self.connections.get_mut(&member) {
                    if peer.room.as_ref() == Some(&room_id) {
                        peer.room = None;
                    }
                }
            }
            tracing::info!(room = room_id.as_str(), "room expired after inactivity");
            expired += 1;
        }

        self.metrics
            .rooms_expired
            .fetch_add(expired as u64, Ordering::Relaxed);
        expired
    }

    /// Count members of a room.
    pub fn room_size(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    /// Get total live connections.
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Get total rooms with at least one member.
    pub fn total_rooms(&self) -> usize {
        self.rooms.len()
    }
}
