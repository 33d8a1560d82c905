pub mod actor;
pub mod broadcast;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod rooms;
pub mod session;

use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The session registry holds one per connection; everything else sends through it.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
