use std::sync::Arc;

use crate::interface_adapters::sync::SyncService;
use crate::use_cases::SessionRegistry;

pub struct AppState {
    // Session lifecycle is owned by the transport adapter.
    pub sessions: Arc<SessionRegistry>,
    // All inbound frames and room fan-out go through the sync service.
    pub sync: SyncService,
}
