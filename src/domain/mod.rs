// Domain layer: room-scoped synchronized state and its change tracking.

pub mod delta;
pub mod player;
pub mod room;

pub use delta::{Delta, FieldChanges};
pub use player::PlayerState;
pub use room::Room;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds used to stamp state values and outbound messages.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
