// Interface adapters: wire protocol, message routing, and the WebSocket
// transport that drives them.

pub mod net;
pub mod protocol;
pub mod state;
pub mod sync;
pub mod utils;

pub use net::ws_handler;
pub use state::AppState;
pub use sync::{SpawnSource, SyncService};
