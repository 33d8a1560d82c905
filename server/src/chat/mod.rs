//! Inbound event handling: routing, channel messages, DMs, typing and presence.

pub mod dm;
pub mod messages;
pub mod presence;
pub mod router;
pub mod typing;
