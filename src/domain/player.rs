// Immutable per-player state. Every mutation builds a fresh value, so a
// reader holding an older instance never observes a half-applied change.

use super::now_millis;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: String,
    pub player_name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    // Bookkeeping only; never part of a delta.
    pub last_update_time: u64,
}

impl PlayerState {
    pub fn new(
        player_id: impl Into<String>,
        player_name: impl Into<String>,
        color: impl Into<String>,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            player_name: player_name.into(),
            color: color.into(),
            x,
            y,
            last_update_time: now_millis(),
        }
    }

    /// Returns a new state at the given position with a fresh timestamp.
    pub fn with_position(&self, x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            last_update_time: now_millis(),
            ..self.clone()
        }
    }

    /// Returns a new state carrying the given display name.
    pub fn with_name(&self, player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            last_update_time: now_millis(),
            ..self.clone()
        }
    }

    /// Returns a new state carrying the given color.
    pub fn with_color(&self, color: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            last_update_time: now_millis(),
            ..self.clone()
        }
    }
}
