//! In-memory directory for scenario tests.
//!
//! Cheap to clone (shared state behind one mutex). `set_unavailable(true)`
//! makes every call fail with `Unavailable` until switched back. Presence
//! writes and friend lookups can each be made to fail on their own.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Directory, DirectoryError};
use crate::models::{
    Channel, ChannelKind, DirectMessage, Message, PresenceStatus, RoomId, UserId, UserSummary,
};

#[derive(Default)]
struct Inner {
    unavailable: bool,
    fail_presence_writes: bool,
    fail_friend_lookups: bool,
    /// token -> verification outcome
    tokens: HashMap<String, Result<UserId, DirectoryError>>,
    users: HashMap<UserId, (String, PresenceStatus)>,
    /// server id -> members
    servers: HashMap<String, HashSet<UserId>>,
    channels: HashMap<String, Channel>,
    /// (requester, addressee, accepted)
    friendships: Vec<(UserId, UserId, bool)>,
    messages: HashMap<String, Message>,
    direct_messages: Vec<DirectMessage>,
    presence_writes: Vec<(UserId, PresenceStatus)>,
}

impl Inner {
    fn summary(&self, user_id: &UserId) -> Result<UserSummary, DirectoryError> {
        let (username, status) = self.users.get(user_id).ok_or(DirectoryError::NotFound)?;
        Ok(UserSummary {
            id: user_id.clone(),
            username: username.clone(),
            status: *status,
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the rest of the scenario
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<MutexGuard<'_, Inner>, DirectoryError> {
        let state = self.state();
        if state.unavailable {
            return Err(DirectoryError::Unavailable("directory offline".into()));
        }
        Ok(state)
    }

    /// Add a user whose token is its own id.
    pub fn add_user(&self, id: &str, username: &str) -> &Self {
        let mut state = self.state();
        let user = UserId::from(id);
        state.users.insert(user.clone(), (username.to_string(), PresenceStatus::Offline));
        state.tokens.insert(id.to_string(), Ok(user));
        self
    }

    pub fn add_token(&self, token: &str, user_id: &str) -> &Self {
        self.state().tokens.insert(token.to_string(), Ok(UserId::from(user_id)));
        self
    }

    pub fn add_expired_token(&self, token: &str) -> &Self {
        self.state().tokens.insert(token.to_string(), Err(DirectoryError::TokenExpired));
        self
    }

    pub fn add_server(&self, server_id: &str, members: &[&str]) -> &Self {
        self.state()
            .servers
            .entry(server_id.to_string())
            .or_default()
            .extend(members.iter().map(|m| UserId::from(*m)));
        self
    }

    pub fn remove_member(&self, server_id: &str, user_id: &str) -> &Self {
        if let Some(members) = self.state().servers.get_mut(server_id) {
            members.remove(&UserId::from(user_id));
        }
        self
    }

    pub fn add_channel(&self, channel_id: &str, server_id: &str, kind: ChannelKind) -> &Self {
        self.state().channels.insert(
            channel_id.to_string(),
            Channel {
                id: channel_id.to_string(),
                server_id: server_id.to_string(),
                name: channel_id.to_string(),
                kind,
            },
        );
        self
    }

    pub fn add_friendship(&self, a: &str, b: &str, accepted: bool) -> &Self {
        self.state()
            .friendships
            .push((UserId::from(a), UserId::from(b), accepted));
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn set_presence_writes_fail(&self, fail: bool) {
        self.state().fail_presence_writes = fail;
    }

    pub fn set_friend_lookups_fail(&self, fail: bool) {
        self.state().fail_friend_lookups = fail;
    }

    pub fn channel_messages(&self) -> Vec<Message> {
        self.state().messages.values().cloned().collect()
    }

    pub fn direct_messages(&self) -> Vec<DirectMessage> {
        self.state().direct_messages.clone()
    }

    pub fn presence_of(&self, user_id: &str) -> Option<PresenceStatus> {
        self.state().users.get(&UserId::from(user_id)).map(|(_, s)| *s)
    }

    /// Every successful `set_presence` call, in order.
    pub fn presence_writes(&self) -> Vec<(UserId, PresenceStatus)> {
        self.state().presence_writes.clone()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn verify_token(&self, token: &str) -> Result<UserId, DirectoryError> {
        let state = self.available()?;
        state
            .tokens
            .get(token)
            .cloned()
            .unwrap_or(Err(DirectoryError::InvalidToken))
    }

    async fn rooms_for_user(&self, user_id: &UserId) -> Result<HashSet<RoomId>, DirectoryError> {
        let state = self.available()?;
        Ok(state
            .servers
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(id, _)| RoomId::server(id))
            .collect())
    }

    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, DirectoryError> {
        Ok(self.available()?.channels.get(channel_id).cloned())
    }

    async fn is_member(&self, user_id: &UserId, room: &RoomId) -> Result<bool, DirectoryError> {
        let state = self.available()?;
        let server_id = match room {
            RoomId::Server(id) => Some(id.as_str()),
            RoomId::Voice(channel_id) => state.channels.get(channel_id).map(|c| c.server_id.as_str()),
        };
        Ok(server_id
            .and_then(|id| state.servers.get(id))
            .is_some_and(|members| members.contains(user_id)))
    }

    async fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, DirectoryError> {
        let state = self.available()?;
        Ok(state.friendships.iter().any(|(x, y, accepted)| {
            *accepted && ((x == a && y == b) || (x == b && y == a))
        }))
    }

    async fn persist_channel_message(
        &self,
        channel: &Channel,
        sender_id: &UserId,
        content: &str,
    ) -> Result<Message, DirectoryError> {
        let mut state = self.available()?;
        let message = Message {
            id: uuid::Uuid::now_v7().to_string(),
            channel_id: channel.id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender: state.summary(sender_id)?,
        };
        state.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn persist_direct_message(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        content: &str,
    ) -> Result<DirectMessage, DirectoryError> {
        let mut state = self.available()?;
        let dm = DirectMessage {
            id: uuid::Uuid::now_v7().to_string(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender: state.summary(sender_id)?,
        };
        state.direct_messages.push(dm.clone());
        Ok(dm)
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, DirectoryError> {
        Ok(self.available()?.messages.get(message_id).cloned())
    }

    async fn delete_message(
        &self,
        message_id: &str,
        requesting_user: &UserId,
    ) -> Result<(), DirectoryError> {
        let mut state = self.available()?;
        match state.messages.get(message_id) {
            None => Err(DirectoryError::NotFound),
            Some(msg) if &msg.sender_id != requesting_user => Err(DirectoryError::Forbidden),
            Some(_) => {
                state.messages.remove(message_id);
                Ok(())
            }
        }
    }

    async fn friends_of(&self, user_id: &UserId) -> Result<HashSet<UserId>, DirectoryError> {
        let state = self.available()?;
        if state.fail_friend_lookups {
            return Err(DirectoryError::Unavailable("friend lookup failed".into()));
        }
        Ok(state
            .friendships
            .iter()
            .filter(|(_, _, accepted)| *accepted)
            .filter_map(|(a, b, _)| {
                if a == user_id {
                    Some(b.clone())
                } else if b == user_id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect())
    }

    async fn set_presence(
        &self,
        user_id: &UserId,
        status: PresenceStatus,
    ) -> Result<(), DirectoryError> {
        let mut state = self.available()?;
        if state.fail_presence_writes {
            return Err(DirectoryError::Unavailable("presence write rejected".into()));
        }
        let entry = state.users.get_mut(user_id).ok_or(DirectoryError::NotFound)?;
        entry.1 = status;
        state.presence_writes.push((user_id.clone(), status));
        Ok(())
    }
}
