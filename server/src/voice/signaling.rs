//! Voice rooms and WebRTC signaling relay.
//!
//! The server tracks who is in which `voice:<channelId>` room and forwards
//! signaling payloads untouched. Media never passes through here.

use crate::chat::router::EventContext;
use crate::error::EventError;
use crate::models::{RoomId, UserId};
use crate::state::AppState;
use crate::ws::broadcast::{self, Exclude};
use crate::ws::protocol::{CallSignal, ServerEvent, VoiceSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    Start,
    Accept,
    Decline,
    End,
}

impl CallAction {
    fn event(self, from: UserId) -> ServerEvent {
        match self {
            Self::Start => ServerEvent::CallIncoming { from },
            Self::Accept => ServerEvent::CallAccepted { from },
            Self::Decline => ServerEvent::CallDeclined { from },
            Self::End => ServerEvent::CallEnded { from },
        }
    }
}

/// Join `voice:<channelId>`. The channel must exist and the user must be a
/// member of its server. Already-present connections are not re-announced.
pub async fn join_voice(
    state: &AppState,
    ctx: &EventContext,
    channel_id: String,
) -> Result<(), EventError> {
    let user_id = ctx.sender(state)?;
    let channel = state
        .directory
        .channel(&channel_id)
        .await?
        .ok_or(EventError::NotFound("channel"))?;
    if !state.directory.is_member(&user_id, &channel.server_room()).await? {
        return Err(EventError::AuthorizationDenied("not a member of the channel's server"));
    }

    let room = RoomId::voice(&channel.id);
    if state.rooms.is_subscribed(&room, ctx.connection) {
        return Ok(());
    }
    if !state.rooms.join(&room, ctx.connection) {
        return Err(EventError::Unauthenticated);
    }

    let others = broadcast::broadcast_to_room(
        &state.sessions,
        &state.rooms,
        &room,
        &ServerEvent::VoiceUserJoined {
            user_id: user_id.clone(),
            channel_id: channel.id,
        },
        Exclude::Connection(ctx.connection),
    );
    tracing::info!(user_id = %user_id, room = %room, others, "Joined voice room");
    Ok(())
}

/// Leaving a room the connection is not in is a no-op.
pub async fn leave_voice(
    state: &AppState,
    ctx: &EventContext,
    channel_id: String,
) -> Result<(), EventError> {
    let user_id = ctx.sender(state)?;
    let room = RoomId::voice(&channel_id);
    if !state.rooms.leave(&room, ctx.connection) {
        return Ok(());
    }

    announce_left(state, &user_id, &room);
    tracing::info!(user_id = %user_id, room = %room, "Left voice room");
    Ok(())
}

/// Tell whoever is still in `room` that `user_id` left. Used by explicit
/// leave and by connection teardown.
pub fn announce_left(state: &AppState, user_id: &UserId, room: &RoomId) {
    broadcast::broadcast_to_room(
        &state.sessions,
        &state.rooms,
        room,
        &ServerEvent::VoiceUserLeft {
            user_id: user_id.clone(),
            channel_id: room.target_id().to_string(),
        },
        Exclude::Nobody,
    );
}

pub fn relay_voice_signal(
    state: &AppState,
    ctx: &EventContext,
    req: VoiceSignal,
) -> Result<(), EventError> {
    let from = ctx.sender(state)?;
    broadcast::send_to_user(
        &state.sessions,
        &req.to,
        &ServerEvent::VoiceSignal {
            from,
            signal: req.signal,
            channel_id: req.channel_id,
        },
    );
    Ok(())
}

pub fn relay_call_signal(
    state: &AppState,
    ctx: &EventContext,
    req: CallSignal,
) -> Result<(), EventError> {
    let from = ctx.sender(state)?;
    broadcast::send_to_user(
        &state.sessions,
        &req.to,
        &ServerEvent::CallSignal {
            from,
            signal: req.signal,
            kind: req.kind,
        },
    );
    Ok(())
}

/// call:start/accept/decline/end become call:incoming/accepted/declined/ended
/// on the target's connections.
pub fn relay_call(
    state: &AppState,
    ctx: &EventContext,
    to: UserId,
    action: CallAction,
) -> Result<(), EventError> {
    let from = ctx.sender(state)?;
    let delivered = broadcast::send_to_user(&state.sessions, &to, &action.event(from.clone()));
    tracing::debug!(user_id = %from, to = %to, action = ?action, delivered, "Call relayed");
    Ok(())
}
