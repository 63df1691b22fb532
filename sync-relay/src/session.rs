//! Per-connection session management.
//!
//! Each WebSocket connection gets a Session that pumps frames between the
//! socket and the relay, and keeps the connection honest with pings.

use crate::error::RelayError;
use crate::server::{ConnectionId, SyncRelay};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

/// Upgrade an HTTP request to a relay session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(relay): Extension<Arc<SyncRelay>>,
) -> Response {
    let max_frame = relay.config().server.max_frame_bytes;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| async move {
            if let Err(e) = Session::new(relay, socket).run().await {
                tracing::debug!("Session ended with error: {}", e);
            }
        })
}

/// What to do when the heartbeat interval fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping and wait for the pong.
    Ping,
    /// The previous ping went unanswered; drop the connection.
    Terminate,
}

/// Liveness tracking for one connection.
#[derive(Debug, Default)]
pub struct Heartbeat {
    awaiting_pong: bool,
}

impl Heartbeat {
    /// The interval fired.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.awaiting_pong {
            HeartbeatAction::Terminate
        } else {
            self.awaiting_pong = true;
            HeartbeatAction::Ping
        }
    }

    /// The peer answered.
    pub fn on_pong(&mut self) {
        self.awaiting_pong = false;
    }
}

/// A per-connection session.
pub struct Session {
    relay: Arc<SyncRelay>,
    socket: WebSocket,
    heartbeat: Heartbeat,
}

impl Session {
    /// Create a new session for a connection.
    pub fn new(relay: Arc<SyncRelay>, socket: WebSocket) -> Self {
        Self {
            relay,
            socket,
            heartbeat: Heartbeat::default(),
        }
    }

    /// Run the session until the connection closes.
    pub async fn run(self) -> Result<(), RelayError> {
        let Session {
            relay,
            socket,
            mut heartbeat,
        } = self;
        let (outbox, mut inbox) = mpsc::channel::<String>(relay.config().server.outbox_capacity());
        let id = relay.register(outbox);
        tracing::info!(conn = id, "New connection");

        let (mut sink, mut stream) = socket.split();
        let period = relay.config().heartbeat.interval();
        let mut ticker = interval_at(Instant::now() + period, period);

        let result = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&relay, id, &text),
                    Some(Ok(Message::Pong(_))) => heartbeat.on_pong(),
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(conn = id, "Ignoring binary frame");
                    }
                    // Pings are answered by the WebSocket layer.
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(RelayError::WebSocket(e)),
                },
                queued = inbox.recv() => match queued {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            break Err(RelayError::WebSocket(e));
                        }
                    }
                    // The relay dropped this connection.
                    None => break Ok(()),
                },
                _ = ticker.tick() => match heartbeat.on_tick() {
                    HeartbeatAction::Ping => {
                        if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                            break Err(RelayError::WebSocket(e));
                        }
                    }
                    HeartbeatAction::Terminate => {
                        relay.metrics().heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(conn = id, "Heartbeat timeout, terminating connection");
                        break Ok(());
                    }
                },
            }
        };

        relay.unregister(id);
        tracing::info!(conn = id, "Connection closed");
        result
    }
}

fn handle_text(relay: &SyncRelay, id: ConnectionId, text: &str) {
    if let Err(e) = relay.handle_frame(id, text) {
        tracing::debug!(conn = id, "Dropped frame: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_sends_ping() {
        let mut heartbeat = Heartbeat::default();
        assert_eq!(heartbeat.on_tick(), HeartbeatAction::Ping);
    }

    #[test]
    fn unanswered_ping_terminates() {
        let mut heartbeat = Heartbeat::default();
        heartbeat.on_tick();
        assert_eq!(heartbeat.on_tick(), HeartbeatAction::Terminate);
    }

    #[test]
    fn pong_keeps_connection_alive() {
        let mut heartbeat = Heartbeat::default();
        for _ in 0..5 {
            assert_eq!(heartbeat.on_tick(), HeartbeatAction::Ping);
            heartbeat.on_pong();
        }
    }
}
