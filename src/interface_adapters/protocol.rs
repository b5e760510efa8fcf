// Wire protocol for the sync endpoint: one JSON envelope per text frame.
// Unknown inbound fields are ignored; fields that are `None` stay off the
// wire entirely.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{now_millis, Delta, FieldChanges, PlayerState};

/// Message discriminator.
///
/// `JOIN_ROOM`, `LEAVE_ROOM` and `STATE_UPDATE` flow client to server; the
/// rest flow server to client. Anything unrecognized lands on `Unknown` so
/// the handler can answer with an error instead of dropping the frame at
/// the parse stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    JoinRoom,
    LeaveRoom,
    StateUpdate,
    FullState,
    DeltaUpdate,
    PlayerJoined,
    PlayerLeft,
    Error,
    #[serde(other)]
    Unknown,
}

/// The frame envelope shared by every message in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Envelope {
    /// Starts an outbound envelope stamped with the current time; call
    /// sites fill in the rest with struct update syntax.
    pub fn outbound(kind: MessageType) -> Self {
        Self {
            kind,
            room_id: None,
            player_id: None,
            payload: None,
            version: None,
            timestamp: Some(now_millis()),
        }
    }
}

// === Inbound payloads ===

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Position overlay for `STATE_UPDATE`; absent axes keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateUpdatePayload {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

// === Outbound payloads ===

/// Public view of one player, used in `FULL_STATE` and `PLAYER_JOINED`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateDto {
    pub player_id: String,
    pub player_name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
}

impl From<&PlayerState> for PlayerStateDto {
    fn from(state: &PlayerState) -> Self {
        Self {
            player_id: state.player_id.clone(),
            player_name: state.player_name.clone(),
            color: state.color.clone(),
            x: state.x,
            y: state.y,
        }
    }
}

/// `FULL_STATE` payload: the complete players table.
#[derive(Debug, Clone, Serialize)]
pub struct RosterPayload {
    pub players: HashMap<String, PlayerStateDto>,
}

impl RosterPayload {
    pub fn from_players(players: &HashMap<String, PlayerState>) -> Self {
        Self {
            players: players
                .iter()
                .map(|(id, state)| (id.clone(), PlayerStateDto::from(state)))
                .collect(),
        }
    }
}

/// The changed fields of one player inside a `DELTA_UPDATE`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
}

impl From<&FieldChanges> for ChangesDto {
    fn from(changes: &FieldChanges) -> Self {
        Self {
            x: changes.x,
            y: changes.y,
            color: changes.color.clone(),
            player_name: changes.player_name.clone(),
        }
    }
}

/// `DELTA_UPDATE` payload, keyed like the full state so clients can apply
/// both with the same merge path.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaPayload {
    pub players: HashMap<String, ChangesDto>,
}

impl From<&Delta> for DeltaPayload {
    fn from(delta: &Delta) -> Self {
        let mut players = HashMap::with_capacity(1);
        players.insert(delta.player_id.clone(), ChangesDto::from(&delta.changes));
        Self { players }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftPayload {
    pub player_id: String,
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}
