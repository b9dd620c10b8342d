//! Broadcast boundary between the game core and connected clients.
//!
//! The core only ever needs two primitives: fan a payload out to everyone in
//! a room, or push one to a single session. The HTTP/WebSocket plumbing on
//! the other side of this trait lives in `server.rs`.

use crate::events::GameEvent;
use crate::types::{RoomId, SessionId};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Where a broadcast envelope is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Room(RoomId),
    Session(SessionId),
}

/// A scoped event as it crosses the transport boundary.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub scope: Scope,
    pub event: GameEvent,
}

/// Outbound event sink the engine and registry publish through.
pub trait Broadcaster: Send + Sync {
    fn emit_to_room(&self, room_id: RoomId, event: GameEvent);
    fn emit_to_session(&self, session_id: &str, event: GameEvent);
}

/// Production broadcaster: a single tokio broadcast channel the WebSocket
/// layer subscribes to, filtering by scope per connection.
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Envelope>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit_to_room(&self, room_id: RoomId, event: GameEvent) {
        // A send error only means no subscriber is connected right now.
        if self
            .tx
            .send(Envelope {
                scope: Scope::Room(room_id),
                event,
            })
            .is_err()
        {
            debug!(%room_id, "no transport subscribers for room event");
        }
    }

    fn emit_to_session(&self, session_id: &str, event: GameEvent) {
        if self
            .tx
            .send(Envelope {
                scope: Scope::Session(session_id.to_string()),
                event,
            })
            .is_err()
        {
            debug!(session_id, "no transport subscribers for session event");
        }
    }
}

/// Test broadcaster that records every envelope for later assertion.
#[derive(Default)]
pub struct RecordingBroadcaster {
    envelopes: Mutex<Vec<Envelope>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Envelope> {
        self.envelopes.lock().expect("broadcast log poisoned").clone()
    }

    pub fn room_events(&self, room_id: RoomId) -> Vec<GameEvent> {
        self.recorded()
            .into_iter()
            .filter(|e| e.scope == Scope::Room(room_id))
            .map(|e| e.event)
            .collect()
    }

    pub fn session_events(&self, session_id: &str) -> Vec<GameEvent> {
        self.recorded()
            .into_iter()
            .filter(|e| e.scope == Scope::Session(session_id.to_string()))
            .map(|e| e.event)
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn emit_to_room(&self, room_id: RoomId, event: GameEvent) {
        self.envelopes
            .lock()
            .expect("broadcast log poisoned")
            .push(Envelope {
                scope: Scope::Room(room_id),
                event,
            });
    }

    fn emit_to_session(&self, session_id: &str, event: GameEvent) {
        self.envelopes
            .lock()
            .expect("broadcast log poisoned")
            .push(Envelope {
                scope: Scope::Session(session_id.to_string()),
                event,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_broadcaster_delivers_scoped_events() {
        let broadcaster = ChannelBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let room = RoomId::new_v4();
        broadcaster.emit_to_room(room, GameEvent::RoomReset { room_id: room });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.scope, Scope::Room(room));
    }

    #[test]
    fn test_recording_broadcaster_filters_by_scope() {
        let broadcaster = RecordingBroadcaster::new();
        let room = RoomId::new_v4();
        broadcaster.emit_to_room(room, GameEvent::RoomReset { room_id: room });
        broadcaster.emit_to_session("s1", GameEvent::RoomReset { room_id: room });

        assert_eq!(broadcaster.room_events(room).len(), 1);
        assert_eq!(broadcaster.session_events("s1").len(), 1);
        assert!(broadcaster.session_events("s2").is_empty());
    }
}
