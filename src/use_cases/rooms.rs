// Registry of active rooms. Rooms appear when the first player targets them
// and disappear once the last player leaves. The registry never holds
// session references; rooms and sessions meet only in the message handler.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::domain::Room;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the room, creating it on first use. Racing callers with the
    /// same id all receive the one installed instance.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!(room_id, "creating room");
                Arc::new(Room::new(room_id))
            })
            .clone()
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    /// Removes the room iff it has no players at the moment of the check.
    /// The check and the removal are a single atomic step.
    pub fn remove_if_empty(&self, room_id: &str) -> bool {
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| room.is_empty())
            .is_some();
        if removed {
            info!(room_id, "removed empty room");
        }
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total player count across all rooms, for monitoring.
    pub fn total_player_count(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}
