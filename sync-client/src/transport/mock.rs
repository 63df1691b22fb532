//! In-memory relay and transport for testing.
//!
//! [`MockRelay`] implements the relay's room behavior in-process: `join`
//! adds a connection to a room, `ping` is answered with `pong`, and every
//! other frame is forwarded to the other members of the sender's room.
//! [`MockTransport`] connects to it and captures sent frames for
//! verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use sync_types::{DeviceId, Envelope, MessageType, RelayMessage};
use tokio::sync::mpsc;

type ConnId = u64;

/// In-process stand-in for the room relay.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    inner: Arc<Mutex<MockRelayInner>>,
}

#[derive(Debug, Default)]
struct MockRelayInner {
    next_id: ConnId,
    connections: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    rooms: HashMap<String, HashSet<ConnId>>,
    refuse_connections: bool,
    relayed: Vec<Envelope>,
}

impl MockRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse_connections = refuse;
    }

    /// Drop every live connection, as if the relay restarted.
    pub fn drop_all_connections(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connections.clear();
        inner.rooms.clear();
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }

    /// Number of members in a room.
    pub fn room_size(&self, room_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Every envelope the relay forwarded, in order.
    pub fn relayed(&self) -> Vec<Envelope> {
        self.inner.lock().unwrap().relayed.clone()
    }

    /// Number of forwarded envelopes of one type.
    pub fn relayed_count(&self, msg_type: MessageType) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .relayed
            .iter()
            .filter(|e| e.msg_type == msg_type)
            .count()
    }

    fn open(&self) -> Result<(ConnId, mpsc::UnboundedReceiver<String>), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_connections {
            return Err(TransportError::ConnectionFailed(
                "relay refused connection".into(),
            ));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.connections.insert(id, tx);
        Ok((id, rx))
    }

    fn close(&self, id: ConnId) {
        let mut inner = self.inner.lock().unwrap();
        inner.connections.remove(&id);
        inner.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    fn is_open(&self, id: ConnId) -> bool {
        self.inner.lock().unwrap().connections.contains_key(&id)
    }

    fn handle_frame(&self, id: ConnId, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connections.contains_key(&id) {
            return Err(TransportError::ConnectionClosed);
        }
        // Frames the relay cannot parse are dropped.
        let Ok(envelope) = Envelope::from_json(frame) else {
            return Ok(());
        };
        let room = envelope.room_id.as_str().to_owned();

        match envelope.msg_type {
            MessageType::Join => {
                inner.rooms.entry(room).or_default().insert(id);
            }
            MessageType::Ping => {
                let pong = Envelope::new(
                    envelope.room_id.clone(),
                    DeviceId::new("relay"),
                    &RelayMessage::Pong,
                )
                .and_then(|e| e.to_json());
                if let (Ok(pong), Some(tx)) = (pong, inner.connections.get(&id)) {
                    let _ = tx.send(pong);
                }
            }
            _ => {
                let members: Vec<ConnId> = inner
                    .rooms
                    .get(&room)
                    .map(|m| m.iter().copied().filter(|m| *m != id).collect())
                    .unwrap_or_default();
                for member in members {
                    if let Some(tx) = inner.connections.get(&member) {
                        let _ = tx.send(frame.to_owned());
                    }
                }
                inner.relayed.push(envelope);
            }
        }
        Ok(())
    }
}

/// Mock transport for testing.
///
/// Connects to a [`MockRelay`] and captures sent frames for verification.
#[derive(Debug, Clone)]
pub struct MockTransport {
    relay: MockRelay,
    state: Arc<Mutex<MockTransportInner>>,
    inbox: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    conn_id: Option<ConnId>,
    connected_address: Option<String>,
    connect_count: usize,
    sent_messages: Vec<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a transport attached to `relay`.
    pub fn new(relay: MockRelay) -> Self {
        Self {
            relay,
            state: Arc::new(Mutex::new(MockTransportInner::default())),
            inbox: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Get all frames that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        self.state.lock().unwrap().sent_messages.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.state.lock().unwrap().connected_address.clone()
    }

    /// Number of successful connects (initial plus reconnects).
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.state.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Drop this transport's connection on the relay side.
    pub fn drop_connection(&self) {
        let id = self.state.lock().unwrap().conn_id;
        if let Some(id) = id {
            self.relay.close(id);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let previous = {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
            state.conn_id.take()
        };
        if let Some(previous) = previous {
            self.relay.close(previous);
        }

        let (id, rx) = self.relay.open()?;
        {
            let mut state = self.state.lock().unwrap();
            state.conn_id = Some(id);
            state.connected_address = Some(address.to_string());
            state.connect_count += 1;
        }
        *self.inbox.lock().await = Some(rx);
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.conn_id.ok_or(TransportError::NotConnected)?;
            if let Some(error) = state.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }
            state.sent_messages.push(frame.clone());
            id
        };
        self.relay.handle_frame(id, &frame)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut inbox = self.inbox.lock().await;
        let rx = inbox.as_mut().ok_or(TransportError::NotConnected)?;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        let id = self.state.lock().unwrap().conn_id;
        id.is_some_and(|id| self.relay.is_open(id))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let id = self.state.lock().unwrap().conn_id.take();
        if let Some(id) = id {
            self.relay.close(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::RoomId;

    fn frame(room: &str, from: &str, msg: RelayMessage) -> String {
        Envelope::new(RoomId::new(room), DeviceId::new(from), &msg)
            .unwrap()
            .to_json()
            .unwrap()
    }

    async fn joined(relay: &MockRelay, room: &str, device: &str) -> MockTransport {
        let transport = MockTransport::new(relay.clone());
        transport.connect("mock://relay").await.unwrap();
        transport
            .send(frame(room, device, RelayMessage::Join))
            .await
            .unwrap();
        transport
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let relay = MockRelay::new();
        let transport = MockTransport::new(relay.clone());
        assert!(!transport.is_connected());

        transport.connect("mock://relay").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_address(),
            Some("mock://relay".to_string())
        );
        assert_eq!(relay.connection_count(), 1);
    }

    #[tokio::test]
    async fn frames_are_relayed_to_other_room_members() {
        let relay = MockRelay::new();
        let a = joined(&relay, "room", "a").await;
        let b = joined(&relay, "room", "b").await;
        assert_eq!(relay.room_size("room"), 2);

        a.send(frame("room", "a", RelayMessage::SyncDone))
            .await
            .unwrap();

        let received = Envelope::from_json(&b.recv().await.unwrap()).unwrap();
        assert_eq!(received.msg_type, MessageType::SyncDone);
        assert_eq!(received.from, DeviceId::new("a"));
        assert_eq!(relay.relayed_count(MessageType::SyncDone), 1);
    }

    #[tokio::test]
    async fn sender_does_not_receive_its_own_frames() {
        let relay = MockRelay::new();
        let a = joined(&relay, "room", "a").await;
        let _b = joined(&relay, "room", "b").await;

        a.send(frame("room", "a", RelayMessage::SyncDone))
            .await
            .unwrap();
        a.send(frame("room", "a", RelayMessage::Ping)).await.unwrap();

        // The only frame waiting for `a` is the relay's pong.
        let received = Envelope::from_json(&a.recv().await.unwrap()).unwrap();
        assert_eq!(received.msg_type, MessageType::Pong);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let relay = MockRelay::new();
        let a = joined(&relay, "room-1", "a").await;
        let c = joined(&relay, "room-2", "c").await;

        a.send(frame("room-1", "a", RelayMessage::SyncDone))
            .await
            .unwrap();
        c.send(frame("room-2", "c", RelayMessage::Ping)).await.unwrap();

        let received = Envelope::from_json(&c.recv().await.unwrap()).unwrap();
        assert_eq!(received.msg_type, MessageType::Pong);
    }

    #[tokio::test]
    async fn close_removes_member_and_empty_room() {
        let relay = MockRelay::new();
        let a = joined(&relay, "room", "a").await;
        assert_eq!(relay.room_size("room"), 1);

        a.close().await.unwrap();

        assert!(!a.is_connected());
        assert_eq!(relay.room_size("room"), 0);
        assert_eq!(relay.connection_count(), 0);
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new(MockRelay::new());
        let result = transport.send("{}".into()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn recv_without_connect_fails() {
        let transport = MockTransport::new(MockRelay::new());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new(MockRelay::new());
        transport.fail_next_connect("network unreachable");

        let result = transport.connect("mock://relay").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Next connect should work
        transport.connect("mock://relay").await.unwrap();
    }

    #[tokio::test]
    async fn refused_connections() {
        let relay = MockRelay::new();
        relay.refuse_connections(true);
        let transport = MockTransport::new(relay.clone());
        assert!(transport.connect("mock://relay").await.is_err());

        relay.refuse_connections(false);
        assert!(transport.connect("mock://relay").await.is_ok());
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new(MockRelay::new());
        transport.connect("mock://relay").await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send("{}".into()).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send("{}".into()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_connection_closes_recv() {
        let relay = MockRelay::new();
        let transport = joined(&relay, "room", "a").await;

        transport.drop_connection();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(matches!(
            transport.send("{}".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn reconnect_replaces_connection() {
        let relay = MockRelay::new();
        let transport = joined(&relay, "room", "a").await;
        transport.drop_connection();

        transport.connect("mock://relay").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(relay.connection_count(), 1);
    }

    // ===========================================
    // Last Sent Helper Test
    // ===========================================

    #[tokio::test]
    async fn last_sent_returns_most_recent() {
        let transport = MockTransport::new(MockRelay::new());
        transport.connect("mock://relay").await.unwrap();

        assert!(transport.last_sent().is_none());

        transport.send("first".into()).await.unwrap();
        assert_eq!(transport.last_sent(), Some("first".to_string()));

        transport.send("second".into()).await.unwrap();
        assert_eq!(transport.last_sent(), Some("second".to_string()));
        assert_eq!(transport.sent_messages().len(), 2);
    }
}
