// Use cases layer: live-connection bookkeeping for the sync service.

pub mod rooms;
pub mod session;

pub use rooms::RoomRegistry;
pub use session::{Session, SessionRegistry};
