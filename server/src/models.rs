//! Domain types shared by the gateway, router and directory.
//! Wire shapes (camelCase, SCREAMING status values) match what clients already parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier issued by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A broadcast scope: every member of a server, or everyone in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    Server(String),
    Voice(String),
}

impl RoomId {
    pub fn server(server_id: impl Into<String>) -> Self {
        Self::Server(server_id.into())
    }

    pub fn voice(channel_id: impl Into<String>) -> Self {
        Self::Voice(channel_id.into())
    }

    pub fn is_voice(&self) -> bool {
        matches!(self, Self::Voice(_))
    }

    /// The id after the `server:`/`voice:` prefix.
    pub fn target_id(&self) -> &str {
        match self {
            Self::Server(id) | Self::Voice(id) => id,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "server:{id}"),
            Self::Voice(id) => write!(f, "voice:{id}"),
        }
    }
}

/// Durable presence. Binary on purpose: there are no away/idle states here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "ONLINE" => Some(Self::Online),
            "OFFLINE" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Text,
    Voice,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Voice => "VOICE",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(Self::Text),
            "VOICE" => Some(Self::Voice),
            _ => None,
        }
    }
}

/// Channel facts needed for routing: which server room a channel broadcasts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub kind: ChannelKind,
}

impl Channel {
    pub fn server_room(&self) -> RoomId {
        RoomId::server(&self.server_id)
    }
}

/// Sender summary embedded in message events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub status: PresenceStatus,
}

/// A persisted channel message as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_display_keeps_prefix() {
        let room = RoomId::server("abc");
        assert_eq!(room.to_string(), "server:abc");
        assert!(!room.is_voice());

        let voice = RoomId::voice("v1");
        assert_eq!(voice.to_string(), "voice:v1");
        assert!(voice.is_voice());
        assert_eq!(voice.target_id(), "v1");
    }

    #[test]
    fn presence_serializes_uppercase() {
        let json = serde_json::to_string(&PresenceStatus::Online).unwrap();
        assert_eq!(json, "\"ONLINE\"");
        assert_eq!(PresenceStatus::from_db("OFFLINE"), Some(PresenceStatus::Offline));
        assert_eq!(PresenceStatus::from_db("IDLE"), None);
    }

    #[test]
    fn message_uses_camel_case_fields() {
        let msg = Message {
            id: "m1".into(),
            channel_id: "c1".into(),
            sender_id: UserId::from("u1"),
            content: "hi".into(),
            created_at: Utc::now(),
            sender: UserSummary {
                id: UserId::from("u1"),
                username: "alice".into(),
                status: PresenceStatus::Online,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["channelId"], "c1");
        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["sender"]["status"], "ONLINE");
        assert!(value.get("createdAt").is_some());
    }
}
