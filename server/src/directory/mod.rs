//! Directory Service: the source of membership, friendship and persistence facts.
//!
//! The realtime engine never caches these facts beyond a single event. Every
//! call is fallible; callers treat any error as "abort this operation".

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{Channel, DirectMessage, Message, PresenceStatus, RoomId, UserId};

pub use memory::MemoryDirectory;
pub use sqlite::SqliteDirectory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
}

#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Verify a bearer token and return the user it was issued to.
    async fn verify_token(&self, token: &str) -> Result<UserId, DirectoryError>;

    /// Every room the user may observe right now (one `server:` room per membership).
    async fn rooms_for_user(&self, user_id: &UserId) -> Result<HashSet<RoomId>, DirectoryError>;

    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, DirectoryError>;

    async fn is_member(&self, user_id: &UserId, room: &RoomId) -> Result<bool, DirectoryError>;

    /// True only for an ACCEPTED friendship, in either direction.
    async fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, DirectoryError>;

    async fn persist_channel_message(
        &self,
        channel: &Channel,
        sender_id: &UserId,
        content: &str,
    ) -> Result<Message, DirectoryError>;

    async fn persist_direct_message(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        content: &str,
    ) -> Result<DirectMessage, DirectoryError>;

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, DirectoryError>;

    /// Delete a channel message. Fails with `Forbidden` unless `requesting_user`
    /// is the stored sender.
    async fn delete_message(
        &self,
        message_id: &str,
        requesting_user: &UserId,
    ) -> Result<(), DirectoryError>;

    /// Accepted friends only.
    async fn friends_of(&self, user_id: &UserId) -> Result<HashSet<UserId>, DirectoryError>;

    async fn set_presence(
        &self,
        user_id: &UserId,
        status: PresenceStatus,
    ) -> Result<(), DirectoryError>;
}
