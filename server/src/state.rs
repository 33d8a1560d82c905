use std::sync::Arc;

use crate::chat::presence::PresenceLedger;
use crate::config::LimitsConfig;
use crate::directory::Directory;
use crate::ws::rooms::RoomIndex;
use crate::ws::session::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Membership, friendship and persistence facts
    pub directory: Arc<dyn Directory>,
    /// Live connections per user
    pub sessions: Arc<SessionRegistry>,
    /// Room subscriptions per connection
    pub rooms: Arc<RoomIndex>,
    /// Last published presence per user, one lock per user
    pub presence: Arc<PresenceLedger>,
    pub limits: Arc<LimitsConfig>,
}

impl AppState {
    pub fn new(directory: Arc<dyn Directory>, limits: LimitsConfig) -> Self {
        Self {
            directory,
            sessions: Arc::new(SessionRegistry::new()),
            rooms: Arc::new(RoomIndex::new()),
            presence: Arc::new(PresenceLedger::new()),
            limits: Arc::new(limits),
        }
    }
}
