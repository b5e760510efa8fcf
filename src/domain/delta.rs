// Change tracking between two successive states of one player. Sending only
// the changed fields keeps the per-update payload small at high update rates.

use super::now_millis;
use super::player::PlayerState;

/// The synchronized fields that differ between two player states.
///
/// `last_update_time` is bookkeeping, not synchronized state, so it is never
/// compared and never appears here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldChanges {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub color: Option<String>,
    pub player_name: Option<String>,
}

impl FieldChanges {
    /// Diffs two states field by field.
    ///
    /// Positions compare with IEEE `!=`: a NaN on either side always reads as
    /// changed, which is the safe direction for replication.
    pub fn between(old: &PlayerState, new: &PlayerState) -> Self {
        Self {
            x: (old.x != new.x).then_some(new.x),
            y: (old.y != new.y).then_some(new.y),
            color: (old.color != new.color).then(|| new.color.clone()),
            player_name: (old.player_name != new.player_name)
                .then(|| new.player_name.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.color.is_none() && self.player_name.is_none()
    }
}

/// What changed for one player, stamped with the room version at which the
/// change took effect. Clients compare versions to detect missed updates.
#[derive(Debug, Clone)]
pub struct Delta {
    pub player_id: String,
    pub changes: FieldChanges,
    pub version: u64,
    pub timestamp: u64,
}

impl Delta {
    pub fn new(player_id: impl Into<String>, changes: FieldChanges, version: u64) -> Self {
        Self {
            player_id: player_id.into(),
            changes,
            version,
            timestamp: now_millis(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}
