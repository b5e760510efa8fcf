// Message routing and room fan-out for the sync protocol.
//
// This is where the sync logic lives:
// - JOIN_ROOM: add the player, send the full state, announce the arrival
// - STATE_UPDATE: install new state, broadcast the delta to everyone else
// - LEAVE_ROOM: remove the player, notify the remaining residents
//
// Every handler is synchronous and non-blocking: room and registry
// operations are in-memory, and outbound frames go through each session's
// try_send sink. Errors in one connection's frame never spill into another.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::{Delta, PlayerState, Room};
use crate::frameworks::config;
use crate::interface_adapters::protocol::{
    DeltaPayload, Envelope, ErrorPayload, JoinPayload, MessageType, PlayerLeftPayload,
    PlayerStateDto, RosterPayload, StateUpdatePayload,
};
use crate::use_cases::{RoomRegistry, Session, SessionRegistry};

/// Where joining players spawn inside the play area.
#[derive(Debug, Clone, Copy)]
pub enum SpawnSource {
    /// Uniform sample over the play area.
    Random,
    /// Pinned position, for deterministic tests.
    Fixed(f64, f64),
}

impl SpawnSource {
    fn next(&self) -> (f64, f64) {
        match self {
            SpawnSource::Random => {
                let mut rng = rand::rng();
                (
                    rng.random_range(0.0..config::SPAWN_WIDTH),
                    rng.random_range(0.0..config::SPAWN_HEIGHT),
                )
            }
            SpawnSource::Fixed(x, y) => (*x, *y),
        }
    }
}

pub struct SyncService {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    spawn: SpawnSource,
}

impl SyncService {
    pub fn new(sessions: Arc<SessionRegistry>, rooms: Arc<RoomRegistry>) -> Self {
        Self::with_spawn_source(sessions, rooms, SpawnSource::Random)
    }

    pub fn with_spawn_source(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomRegistry>,
        spawn: SpawnSource,
    ) -> Self {
        Self {
            sessions,
            rooms,
            spawn,
        }
    }

    /// Entry point for one inbound text frame.
    pub fn handle_frame(&self, session: &Arc<Session>, text: &str) {
        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(
                    session_id = %session.session_id(),
                    error = %e,
                    "failed to parse client frame"
                );
                self.send_error(session, "Invalid message format");
                return;
            }
        };

        debug!(
            session_id = %session.session_id(),
            kind = ?envelope.kind,
            "frame received"
        );

        match envelope.kind {
            MessageType::JoinRoom => self.handle_join_room(session, envelope),
            MessageType::LeaveRoom => self.handle_leave_room(session),
            MessageType::StateUpdate => self.handle_state_update(session, envelope),
            _ => {
                // The parsed variant collapses unrecognized strings, so pull
                // the raw type token back out of the frame for the error.
                let kind = raw_message_type(text);
                self.send_error(session, &format!("Unknown message type: {kind}"));
            }
        }
    }

    /// Runs the leave sequence for a closed connection.
    ///
    /// Safe to call after an explicit LEAVE_ROOM: once the session's room
    /// pointer is cleared this does nothing.
    pub fn handle_disconnect(&self, session: &Arc<Session>) {
        self.handle_leave_room(session);
        info!(
            session_id = %session.session_id(),
            player_name = %session.player_name(),
            "player disconnected"
        );
    }

    fn handle_join_room(&self, session: &Arc<Session>, envelope: Envelope) {
        let Some(room_id) = envelope.room_id.filter(|id| !id.is_empty()) else {
            self.send_error(session, "Room ID is required");
            return;
        };

        // A session occupies at most one room; joining again moves it.
        if session.is_in_room() {
            self.handle_leave_room(session);
        }

        let join = envelope
            .payload
            .and_then(|p| serde_json::from_value::<JoinPayload>(p).ok())
            .unwrap_or_default();

        let player_name = join
            .player_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Player-{}", &session.session_id()[..8]));
        let color = join
            .color
            .filter(|color| !color.is_empty())
            .unwrap_or_else(|| fallback_color(session.session_id()).to_string());

        session.set_player_name(player_name.clone());
        session.set_player_color(color.clone());
        session.set_current_room_id(Some(room_id.clone()));

        let (x, y) = self.spawn.next();
        let state = PlayerState::new(session.session_id(), player_name, color, x, y);

        let room = self.rooms.get_or_create(&room_id);
        let version = room.add_player(session.session_id(), state.clone());

        self.send_full_state(session, &room, version);
        self.broadcast_player_joined(&room, session.session_id(), &state, version);
    }

    fn handle_leave_room(&self, session: &Arc<Session>) {
        // Not being in a room is fine; leave is a no-op then.
        let Some(room_id) = session.current_room_id() else {
            return;
        };

        if let Some(room) = self.rooms.get(&room_id) {
            room.remove_player(session.session_id(), session.session_id());
            self.broadcast_player_left(&room, session, room.version());
            self.rooms.remove_if_empty(&room_id);
        }

        session.set_current_room_id(None);
    }

    /// The hot path: overlay the payload position onto the current state and
    /// fan the resulting delta out to everyone else in the room.
    fn handle_state_update(&self, session: &Arc<Session>, envelope: Envelope) {
        let Some(room_id) = session.current_room_id() else {
            self.send_error(session, "Not in a room");
            return;
        };
        let Some(room) = self.rooms.get(&room_id) else {
            self.send_error(session, "Room not found");
            return;
        };

        let Some(payload) = envelope.payload else {
            return;
        };
        let update = serde_json::from_value::<StateUpdatePayload>(payload).unwrap_or_default();

        // The player record can be gone already when the update raced a
        // disconnect; that is not an error worth reporting.
        let Some(current) = room.get_player(session.session_id()) else {
            return;
        };

        let new_state = current.with_position(
            update.x.unwrap_or(current.x),
            update.y.unwrap_or(current.y),
        );

        let Some(delta) = room.update_player_state(session.session_id(), new_state) else {
            return;
        };

        if delta.has_changes() {
            self.broadcast_delta(&room, session.session_id(), &delta);
        }
    }

    // === Outbound construction ===

    fn send_full_state(&self, session: &Arc<Session>, room: &Room, version: u64) {
        let payload = RosterPayload::from_players(&room.players());
        let Some(frame) = encode(&Envelope {
            room_id: Some(room.room_id().to_string()),
            player_id: Some(session.session_id().to_string()),
            payload: to_payload(&payload),
            version: Some(version),
            ..Envelope::outbound(MessageType::FullState)
        }) else {
            return;
        };

        if !session.send(frame) {
            warn!(session_id = %session.session_id(), "failed to queue full state");
        }
    }

    fn broadcast_player_joined(
        &self,
        room: &Room,
        joining_session_id: &str,
        state: &PlayerState,
        version: u64,
    ) {
        let payload = PlayerStateDto::from(state);
        let Some(frame) = encode(&Envelope {
            room_id: Some(room.room_id().to_string()),
            payload: to_payload(&payload),
            version: Some(version),
            ..Envelope::outbound(MessageType::PlayerJoined)
        }) else {
            return;
        };

        self.broadcast_to_room(room, joining_session_id, frame);
    }

    fn broadcast_player_left(&self, room: &Room, leaving: &Arc<Session>, version: u64) {
        let payload = PlayerLeftPayload {
            player_id: leaving.session_id().to_string(),
            player_name: leaving.player_name(),
        };
        let Some(frame) = encode(&Envelope {
            room_id: Some(room.room_id().to_string()),
            payload: to_payload(&payload),
            version: Some(version),
            ..Envelope::outbound(MessageType::PlayerLeft)
        }) else {
            return;
        };

        self.broadcast_to_room(room, leaving.session_id(), frame);
    }

    fn broadcast_delta(&self, room: &Room, sender_session_id: &str, delta: &Delta) {
        let payload = DeltaPayload::from(delta);
        let Some(frame) = encode(&Envelope {
            room_id: Some(room.room_id().to_string()),
            payload: to_payload(&payload),
            version: Some(delta.version),
            ..Envelope::outbound(MessageType::DeltaUpdate)
        }) else {
            return;
        };

        self.broadcast_to_room(room, sender_session_id, frame);
    }

    /// Delivers one serialized frame to every resident except one.
    ///
    /// The resident snapshot can lag membership changes by a beat; sessions
    /// that vanished in between simply resolve to nothing. A recipient with
    /// a saturated queue loses this frame, not the whole fan-out.
    fn broadcast_to_room(&self, room: &Room, exclude_session_id: &str, frame: Utf8Bytes) {
        for session_id in room.session_ids() {
            if session_id == exclude_session_id {
                continue;
            }
            let Some(target) = self.sessions.get_by_id(&session_id) else {
                continue;
            };
            if !target.is_active() {
                continue;
            }
            if !target.send(frame.clone()) {
                warn!(session_id = %session_id, "dropped outbound frame for slow recipient");
            }
        }
    }

    fn send_error(&self, session: &Arc<Session>, message: &str) {
        let payload = ErrorPayload {
            message: message.to_string(),
        };
        let Some(frame) = encode(&Envelope {
            payload: to_payload(&payload),
            ..Envelope::outbound(MessageType::Error)
        }) else {
            return;
        };

        let _ = session.send(frame);
    }
}

/// Serializes each outbound message exactly once; fan-out clones the bytes.
fn encode(envelope: &Envelope) -> Option<Utf8Bytes> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            error!(error = %e, "failed to serialize outbound message");
            None
        }
    }
}

fn to_payload<T: Serialize>(payload: &T) -> Option<serde_json::Value> {
    serde_json::to_value(payload).ok()
}

/// Reads the `type` field of an already-parsed-as-JSON frame verbatim. Only
/// runs on the error path, so the second parse stays off the hot path.
fn raw_message_type(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|frame| frame.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Stable palette pick for players that do not choose a color, keyed off the
/// session id so a given session always lands on the same entry.
fn fallback_color(session_id: &str) -> &'static str {
    let hash = session_id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    config::COLOR_PALETTE[(hash % config::COLOR_PALETTE.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Harness {
        service: SyncService,
        sessions: Arc<SessionRegistry>,
        next_conn: u64,
    }

    struct Client {
        session: Arc<Session>,
        outbound: mpsc::Receiver<Utf8Bytes>,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = Arc::new(SessionRegistry::new());
            let rooms = Arc::new(RoomRegistry::new());
            let service = SyncService::with_spawn_source(
                sessions.clone(),
                rooms.clone(),
                SpawnSource::Fixed(100.0, 100.0),
            );
            Self {
                service,
                sessions,
                next_conn: 1,
            }
        }

        fn connect(&mut self) -> Client {
            let (tx, rx) = mpsc::channel(32);
            let conn_id = self.next_conn;
            self.next_conn += 1;
            Client {
                session: self.sessions.create(conn_id, tx),
                outbound: rx,
            }
        }

        fn rooms(&self) -> &RoomRegistry {
            &self.service.rooms
        }
    }

    impl Client {
        fn recv(&mut self) -> Envelope {
            let frame = self.outbound.try_recv().expect("expected an outbound frame");
            serde_json::from_str(frame.as_str()).expect("outbound frame should be an envelope")
        }

        fn assert_silent(&mut self) {
            assert!(
                self.outbound.try_recv().is_err(),
                "expected no outbound frame"
            );
        }
    }

    fn join(service: &SyncService, client: &Client, room: &str, name: &str, color: &str) {
        let frame = serde_json::json!({
            "type": "JOIN_ROOM",
            "roomId": room,
            "payload": { "playerName": name, "color": color },
        });
        service.handle_frame(&client.session, &frame.to_string());
    }

    fn move_to(service: &SyncService, client: &Client, x: f64, y: f64) {
        let frame = serde_json::json!({
            "type": "STATE_UPDATE",
            "payload": { "x": x, "y": y },
        });
        service.handle_frame(&client.session, &frame.to_string());
    }

    #[test]
    fn solo_join_gets_full_state_at_version_one() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();

        join(&harness.service, &c1, "R", "A", "#FF0000");

        let reply = c1.recv();
        assert_eq!(reply.kind, MessageType::FullState);
        assert_eq!(reply.version, Some(1));
        assert_eq!(reply.room_id.as_deref(), Some("R"));

        let payload = reply.payload.unwrap();
        let players = &payload["players"];
        let me = &players[c1.session.session_id()];
        assert_eq!(me["playerName"], "A");
        assert_eq!(me["color"], "#FF0000");
        assert_eq!(me["x"], 100.0);
        assert_eq!(players.as_object().unwrap().len(), 1);
        c1.assert_silent();
    }

    #[test]
    fn second_join_notifies_the_first_resident() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();

        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();

        join(&harness.service, &c2, "R", "B", "#00FF00");

        let full = c2.recv();
        assert_eq!(full.kind, MessageType::FullState);
        assert_eq!(full.version, Some(2));
        let players = full.payload.unwrap()["players"].as_object().unwrap().len();
        assert_eq!(players, 2);

        let joined = c1.recv();
        assert_eq!(joined.kind, MessageType::PlayerJoined);
        assert_eq!(joined.version, Some(2));
        assert_eq!(joined.payload.unwrap()["playerName"], "B");
    }

    #[test]
    fn movement_reaches_everyone_but_the_mover() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();

        move_to(&harness.service, &c1, 150.0, 200.0);

        let delta = c2.recv();
        assert_eq!(delta.kind, MessageType::DeltaUpdate);
        assert_eq!(delta.version, Some(3));
        assert_eq!(
            delta.payload.unwrap()["players"][c1.session.session_id()],
            serde_json::json!({ "x": 150.0, "y": 200.0 })
        );
        c1.assert_silent();
    }

    #[test]
    fn repeating_a_position_broadcasts_nothing() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();

        move_to(&harness.service, &c1, 150.0, 200.0);
        let _ = c2.recv();
        move_to(&harness.service, &c1, 150.0, 200.0);

        c2.assert_silent();
        let room = harness.rooms().get("R").unwrap();
        assert_eq!(room.version(), 3);
    }

    #[test]
    fn update_without_position_fields_is_not_broadcast() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();

        let frame = serde_json::json!({ "type": "STATE_UPDATE", "payload": {} });
        harness.service.handle_frame(&c1.session, &frame.to_string());

        c2.assert_silent();
    }

    #[test]
    fn join_without_room_id_is_rejected() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();

        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"JOIN_ROOM"}"#);
        let reply = c1.recv();
        assert_eq!(reply.kind, MessageType::Error);

        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"JOIN_ROOM","roomId":""}"#);
        assert_eq!(c1.recv().kind, MessageType::Error);

        assert!(!c1.session.is_in_room());
        assert_eq!(harness.rooms().room_count(), 0);
    }

    #[test]
    fn join_defaults_fill_in_name_and_palette_color() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();

        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"JOIN_ROOM","roomId":"R"}"#);

        let reply = c1.recv();
        let players = reply.payload.unwrap()["players"].clone();
        let me = &players[c1.session.session_id()];
        let expected_name = format!("Player-{}", &c1.session.session_id()[..8]);
        assert_eq!(me["playerName"], expected_name.as_str());
        let color = me["color"].as_str().unwrap();
        assert!(config::COLOR_PALETTE.contains(&color));
    }

    #[test]
    fn state_update_outside_a_room_is_an_error() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();

        move_to(&harness.service, &c1, 1.0, 1.0);

        assert_eq!(c1.recv().kind, MessageType::Error);
    }

    #[test]
    fn leave_without_a_room_is_silent() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();

        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"LEAVE_ROOM"}"#);

        c1.assert_silent();
    }

    #[test]
    fn rejoining_elsewhere_leaves_the_first_room() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R1", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R1", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();

        join(&harness.service, &c1, "R2", "A", "#FF0000");

        let left = c2.recv();
        assert_eq!(left.kind, MessageType::PlayerLeft);
        let payload = left.payload.unwrap();
        assert_eq!(payload["playerId"], c1.session.session_id());
        assert_eq!(payload["playerName"], "A");

        assert_eq!(c1.recv().kind, MessageType::FullState);
        assert_eq!(c1.session.current_room_id().as_deref(), Some("R2"));
        assert_eq!(harness.rooms().get("R1").unwrap().player_count(), 1);
    }

    #[test]
    fn disconnect_cleans_up_and_is_idempotent() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();

        harness.service.handle_disconnect(&c1.session);

        let left = c2.recv();
        assert_eq!(left.kind, MessageType::PlayerLeft);
        assert_eq!(left.version, Some(3));
        assert_eq!(left.payload.unwrap()["playerName"], "A");

        // A second pass (close after explicit leave) does nothing further.
        harness.service.handle_disconnect(&c1.session);
        c2.assert_silent();

        let room = harness.rooms().get("R").unwrap();
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn last_leave_garbage_collects_the_room() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();

        harness.service.handle_disconnect(&c1.session);

        assert!(harness.rooms().get("R").is_none());
        // The next occupant gets a brand new room.
        let fresh = harness.rooms().get_or_create("R");
        assert_eq!(fresh.version(), 0);
    }

    #[test]
    fn malformed_and_unknown_frames_only_answer_the_sender() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let mut c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c2.recv();
        let _ = c1.recv();
        let version_before = harness.rooms().get("R").unwrap().version();

        harness.service.handle_frame(&c1.session, "not valid json");
        assert_eq!(c1.recv().kind, MessageType::Error);

        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"TELEPORT"}"#);
        let reply = c1.recv();
        assert_eq!(reply.kind, MessageType::Error);
        // The error names the type the client actually sent.
        let payload = reply.payload.unwrap();
        assert_eq!(payload["message"], "Unknown message type: TELEPORT");

        // Server-to-client types are equally invalid inbound.
        harness
            .service
            .handle_frame(&c1.session, r#"{"type":"FULL_STATE"}"#);
        let reply = c1.recv();
        assert_eq!(reply.kind, MessageType::Error);
        let payload = reply.payload.unwrap();
        assert_eq!(payload["message"], "Unknown message type: FULL_STATE");

        c2.assert_silent();
        assert_eq!(harness.rooms().get("R").unwrap().version(), version_before);
    }

    #[test]
    fn fan_out_survives_a_vanished_recipient() {
        let mut harness = Harness::new();
        let mut c1 = harness.connect();
        let c2 = harness.connect();
        join(&harness.service, &c1, "R", "A", "#FF0000");
        let _ = c1.recv();
        join(&harness.service, &c2, "R", "B", "#00FF00");
        let _ = c1.recv();

        // c2's transport goes away without a disconnect pass: its session
        // leaves the registry but its player record is still in the room.
        harness.sessions.remove(c2.session.conn_id());
        drop(c2);

        move_to(&harness.service, &c1, 42.0, 42.0);

        // Fan-out skipped the gone recipient and the room stayed intact.
        assert_eq!(harness.rooms().get("R").unwrap().player_count(), 2);
        c1.assert_silent();
    }

    #[test]
    fn fallback_color_is_stable_per_session() {
        assert_eq!(fallback_color("abcd-1234"), fallback_color("abcd-1234"));
    }
}
