// A room holds the authoritative shared state for one set of mutually
// visible players.
//
// Thread safety:
// 1. Concurrent map/set for players and resident sessions, so reads never
//    block writers in other tasks.
// 2. Atomic counter for the version number.
// 3. One per-room mutex around state updates only, because delta calculation
//    needs the old and new state to line up with a single version step.
//
// Rooms are independent of each other; there is no cross-room locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::{DashMap, DashSet};
use tracing::{info, warn};

use super::delta::{Delta, FieldChanges};
use super::now_millis;
use super::player::PlayerState;

pub struct Room {
    room_id: String,
    created_at: u64,
    players: DashMap<String, PlayerState>,
    // Sessions currently resident; keys match `players` one to one.
    session_ids: DashSet<String>,
    version: AtomicU64,
    update_lock: Mutex<()>,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            created_at: now_millis(),
            players: DashMap::new(),
            session_ids: DashSet::new(),
            version: AtomicU64::new(0),
            update_lock: Mutex::new(()),
        }
    }

    /// Adds a player and its session to the room.
    ///
    /// Re-adding an existing session overwrites its player record. Returns
    /// the room version assigned to the join.
    pub fn add_player(&self, session_id: &str, state: PlayerState) -> u64 {
        self.session_ids.insert(session_id.to_string());
        let player_name = state.player_name.clone();
        self.players.insert(state.player_id.clone(), state);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            player_name = %player_name,
            room_id = %self.room_id,
            version,
            "player joined room"
        );

        version
    }

    /// Removes a player and its session, returning the removed state if any.
    pub fn remove_player(&self, session_id: &str, player_id: &str) -> Option<PlayerState> {
        // The session id doubles as the player-map key by construction.
        debug_assert_eq!(session_id, player_id);

        self.session_ids.remove(session_id);
        let removed = self.players.remove(player_id).map(|(_, state)| state);
        self.version.fetch_add(1, Ordering::SeqCst);

        if let Some(state) = &removed {
            info!(
                player_name = %state.player_name,
                room_id = %self.room_id,
                "player left room"
            );
        }

        removed
    }

    /// Installs a new state for the player and returns what changed.
    ///
    /// The hot path. Returns `None` when the player is unknown (a benign
    /// race after disconnect). The lock scope covers read-old, diff,
    /// install, and version bump so concurrent observers see the triple
    /// (old state, new state, version) move as one step.
    pub fn update_player_state(&self, player_id: &str, new_state: PlayerState) -> Option<Delta> {
        let _guard = self
            .update_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Clone out of the map so no shard lock is held across the insert.
        let old_state = self.players.get(player_id).map(|s| s.value().clone());
        let Some(old_state) = old_state else {
            warn!(player_id, room_id = %self.room_id, "update for unknown player");
            return None;
        };

        let changes = FieldChanges::between(&old_state, &new_state);
        if changes.is_empty() {
            // Nothing synchronized moved; keep the current state and version
            // so clients cannot observe phantom updates.
            return Some(Delta::new(player_id, changes, self.version()));
        }

        self.players.insert(player_id.to_string(), new_state);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

        Some(Delta::new(player_id, changes, version))
    }

    pub fn get_player(&self, player_id: &str) -> Option<PlayerState> {
        self.players.get(player_id).map(|s| s.value().clone())
    }

    /// Snapshot of every player keyed by player id.
    pub fn players(&self) -> HashMap<String, PlayerState> {
        self.players
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Snapshot of the resident session ids, taken for broadcast fan-out.
    pub fn session_ids(&self) -> Vec<String> {
        self.session_ids.iter().map(|id| id.key().clone()).collect()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.session_ids.contains(session_id)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
