// One session per live WebSocket connection, plus the registry that indexes
// sessions by connection id (transport lookups) and by session id (sync
// logic lookups).

use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::now_millis;

/// A connected client.
///
/// The session id is minted at accept time and doubles as the player id for
/// as long as the session resides in a room. The outbound sender is the
/// non-blocking send sink; the transport task drains the other end into the
/// socket.
pub struct Session {
    session_id: String,
    conn_id: u64,
    connected_at: u64,
    outbound: mpsc::Sender<Utf8Bytes>,
    current_room_id: RwLock<Option<String>>,
    player_name: RwLock<String>,
    player_color: RwLock<String>,
}

impl Session {
    fn new(conn_id: u64, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            conn_id,
            connected_at: now_millis(),
            outbound,
            current_room_id: RwLock::new(None),
            player_name: RwLock::new("Anonymous".to_string()),
            player_color: RwLock::new("#FFFFFF".to_string()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    /// Queues a frame for transmission without blocking.
    ///
    /// Returns false when the recipient's queue is saturated or its
    /// transport task is gone; delivery is best effort per message.
    pub fn send(&self, frame: Utf8Bytes) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    pub fn is_active(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn current_room_id(&self) -> Option<String> {
        self.current_room_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_room_id(&self, room_id: Option<String>) {
        *self
            .current_room_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = room_id;
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn player_name(&self) -> String {
        self.player_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_player_name(&self, name: impl Into<String>) {
        *self
            .player_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    pub fn player_color(&self) -> String {
        self.player_color
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_player_color(&self, color: impl Into<String>) {
        *self
            .player_color
            .write()
            .unwrap_or_else(PoisonError::into_inner) = color.into();
    }
}

/// Registry of every live session, indexed both ways.
///
/// All operations are safe from unrelated connection tasks; reads do not
/// block each other.
#[derive(Default)]
pub struct SessionRegistry {
    by_conn: DashMap<u64, Arc<Session>>,
    by_id: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a session for a freshly accepted connection and registers it
    /// under both indexes. The transport calls this once per connection.
    pub fn create(&self, conn_id: u64, outbound: mpsc::Sender<Utf8Bytes>) -> Arc<Session> {
        let session = Arc::new(Session::new(conn_id, outbound));

        self.by_conn.insert(conn_id, session.clone());
        self.by_id
            .insert(session.session_id().to_string(), session.clone());

        info!(session_id = %session.session_id(), conn_id, "session created");
        debug!(active_sessions = self.count(), "registry grew");

        session
    }

    /// Drops the session for a closed connection from both indexes.
    pub fn remove(&self, conn_id: u64) -> Option<Arc<Session>> {
        let session = self.by_conn.remove(&conn_id).map(|(_, session)| session)?;
        self.by_id.remove(session.session_id());

        info!(session_id = %session.session_id(), conn_id, "session removed");
        debug!(active_sessions = self.count(), "registry shrank");

        Some(session)
    }

    pub fn get_by_conn(&self, conn_id: u64) -> Option<Arc<Session>> {
        self.by_conn.get(&conn_id).map(|s| s.value().clone())
    }

    pub fn get_by_id(&self, session_id: &str) -> Option<Arc<Session>> {
        self.by_id.get(session_id).map(|s| s.value().clone())
    }

    pub fn count(&self) -> usize {
        self.by_id.len()
    }
}
