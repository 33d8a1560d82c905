//! Wire protocol: JSON text frames shaped `{"event": "<name>", "data": {...}}`.
//!
//! Inbound events are a closed set; anything that does not match a known
//! event and its exact field set fails to decode and is dropped.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{DirectMessage, Message as ChatMessage, PresenceStatus, UserId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", deny_unknown_fields)]
pub enum ClientEvent {
    #[serde(rename = "message:send")]
    MessageSend(MessageSend),
    #[serde(rename = "message:delete")]
    MessageDelete(MessageDelete),
    #[serde(rename = "dm:send")]
    DmSend(DmSend),
    #[serde(rename = "typing:start")]
    TypingStart(Typing),
    #[serde(rename = "typing:stop")]
    TypingStop(Typing),
    #[serde(rename = "voice:join")]
    VoiceJoin(VoiceChannel),
    #[serde(rename = "voice:leave")]
    VoiceLeave(VoiceChannel),
    #[serde(rename = "voice:signal")]
    VoiceSignal(VoiceSignal),
    #[serde(rename = "call:start")]
    CallStart(CallTarget),
    #[serde(rename = "call:accept")]
    CallAccept(CallTarget),
    #[serde(rename = "call:decline")]
    CallDecline(CallTarget),
    #[serde(rename = "call:end")]
    CallEnd(CallTarget),
    #[serde(rename = "call:signal")]
    CallSignal(CallSignal),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSend(_) => "message:send",
            Self::MessageDelete(_) => "message:delete",
            Self::DmSend(_) => "dm:send",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::VoiceJoin(_) => "voice:join",
            Self::VoiceLeave(_) => "voice:leave",
            Self::VoiceSignal(_) => "voice:signal",
            Self::CallStart(_) => "call:start",
            Self::CallAccept(_) => "call:accept",
            Self::CallDecline(_) => "call:decline",
            Self::CallEnd(_) => "call:end",
            Self::CallSignal(_) => "call:signal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageSend {
    pub channel_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageDelete {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DmSend {
    pub receiver_id: UserId,
    pub content: String,
}

/// Exactly one of the two targets is expected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Typing {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub dm_user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoiceChannel {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoiceSignal {
    pub to: UserId,
    pub signal: Value,
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallTarget {
    pub to: UserId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSignal {
    pub to: UserId,
    pub signal: Value,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew(ChatMessage),
    #[serde(rename = "message:deleted")]
    MessageDeleted { message_id: String, channel_id: String },
    #[serde(rename = "dm:new")]
    DmNew(DirectMessage),
    #[serde(rename = "friend:status")]
    FriendStatus {
        user_id: UserId,
        status: PresenceStatus,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
    },
    #[serde(rename = "voice:user-joined")]
    VoiceUserJoined { user_id: UserId, channel_id: String },
    #[serde(rename = "voice:user-left")]
    VoiceUserLeft { user_id: UserId, channel_id: String },
    #[serde(rename = "voice:signal")]
    VoiceSignal {
        from: UserId,
        signal: Value,
        channel_id: String,
    },
    #[serde(rename = "call:signal")]
    CallSignal {
        from: UserId,
        signal: Value,
        #[serde(rename = "type")]
        kind: String,
    },
    #[serde(rename = "call:incoming")]
    CallIncoming { from: UserId },
    #[serde(rename = "call:accepted")]
    CallAccepted { from: UserId },
    #[serde(rename = "call:declined")]
    CallDeclined { from: UserId },
    #[serde(rename = "call:ended")]
    CallEnded { from: UserId },
}

pub fn decode(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Serialize once into a text frame; callers clone the frame per recipient.
pub fn encode(event: &ServerEvent) -> Result<Message, serde_json::Error> {
    serde_json::to_string(event).map(|json| Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(event: &ServerEvent) -> Value {
        serde_json::to_value(event).unwrap()
    }

    #[test]
    fn decodes_message_send() {
        let event = decode(r#"{"event":"message:send","data":{"channelId":"c1","content":"hi"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::MessageSend(MessageSend {
                channel_id: "c1".into(),
                content: "hi".into()
            })
        );
        assert_eq!(event.name(), "message:send");
    }

    #[test]
    fn typing_targets_are_optional() {
        let event = decode(r#"{"event":"typing:start","data":{"dmUserId":"u2"}}"#).unwrap();
        let ClientEvent::TypingStart(typing) = event else {
            panic!("wrong variant");
        };
        assert_eq!(typing.dm_user_id, Some(UserId::from("u2")));
        assert!(typing.channel_id.is_none());

        assert!(decode(r#"{"event":"typing:stop","data":{}}"#).is_ok());
    }

    #[test]
    fn call_signal_keeps_opaque_payload() {
        let event = decode(
            r#"{"event":"call:signal","data":{"to":"u2","signal":{"sdp":"v=0"},"type":"offer"}}"#,
        )
        .unwrap();
        let ClientEvent::CallSignal(signal) = event else {
            panic!("wrong variant");
        };
        assert_eq!(signal.kind, "offer");
        assert_eq!(signal.signal, json!({"sdp": "v=0"}));
    }

    #[test]
    fn rejects_unknown_events_and_fields() {
        assert!(decode(r#"{"event":"admin:nuke","data":{}}"#).is_err());
        assert!(decode(r#"{"event":"message:delete","data":{"messageId":"m","extra":1}}"#).is_err());
        assert!(decode(r#"{"event":"message:send","data":{"channelId":"c"}}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn server_events_use_wire_names() {
        let status = to_json(&ServerEvent::FriendStatus {
            user_id: UserId::from("u1"),
            status: PresenceStatus::Offline,
        });
        assert_eq!(status, json!({"event": "friend:status", "data": {"userId": "u1", "status": "OFFLINE"}}));

        let deleted = to_json(&ServerEvent::MessageDeleted {
            message_id: "m1".into(),
            channel_id: "c1".into(),
        });
        assert_eq!(deleted["data"]["messageId"], "m1");
        assert_eq!(deleted["data"]["channelId"], "c1");

        let call = to_json(&ServerEvent::CallSignal {
            from: UserId::from("u1"),
            signal: json!(1),
            kind: "answer".into(),
        });
        assert_eq!(call, json!({"event": "call:signal", "data": {"from": "u1", "signal": 1, "type": "answer"}}));
    }

    #[test]
    fn typing_omits_channel_for_dms() {
        let dm = to_json(&ServerEvent::TypingStart {
            user_id: UserId::from("u1"),
            channel_id: None,
        });
        assert_eq!(dm, json!({"event": "typing:start", "data": {"userId": "u1"}}));

        let channel = to_json(&ServerEvent::TypingStop {
            user_id: UserId::from("u1"),
            channel_id: Some("c1".into()),
        });
        assert_eq!(channel["data"]["channelId"], "c1");
    }

    #[test]
    fn encode_produces_text_frame() {
        let frame = encode(&ServerEvent::CallEnded { from: UserId::from("u1") }).unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let parsed: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(parsed["event"], "call:ended");
    }
}
