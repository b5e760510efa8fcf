use std::{env, time::Duration};

// Runtime/server constants (transport limits and sync tuning).

pub fn port() -> u16 {
    env::var("SYNC_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
}

// A connection that sends nothing for this long gets closed. Write idle
// carries no deadline.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

// Bound on the HTTP phase of each request, which for `/sync` is the
// WebSocket handshake. Established connections are governed by the
// read-idle deadline instead.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_FRAME_BYTES: usize = 64 * 1024;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

// Play area sampled for initial spawn positions.
pub const SPAWN_WIDTH: f64 = 800.0;
pub const SPAWN_HEIGHT: f64 = 600.0;

// Fallback colors for players that do not pick one.
pub const COLOR_PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];
