use super::router::EventContext;
use crate::error::EventError;
use crate::state::AppState;
use crate::ws::broadcast::{self, Exclude};
use crate::ws::protocol::{ServerEvent, Typing};

/// Relay a typing indicator. Nothing is persisted.
///
/// A channel indicator goes to the channel's server room minus the typist's
/// own connections; a DM indicator goes to the other user and carries no
/// `channelId`.
pub async fn relay_typing(
    state: &AppState,
    ctx: &EventContext,
    req: Typing,
    started: bool,
) -> Result<(), EventError> {
    let user_id = ctx.sender(state)?;
    let event = |channel_id: Option<String>| {
        let user_id = user_id.clone();
        if started {
            ServerEvent::TypingStart { user_id, channel_id }
        } else {
            ServerEvent::TypingStop { user_id, channel_id }
        }
    };

    match (req.channel_id, req.dm_user_id) {
        (Some(channel_id), _) => {
            let channel = state
                .directory
                .channel(&channel_id)
                .await?
                .ok_or(EventError::NotFound("channel"))?;
            let room = channel.server_room();
            if !state.rooms.is_subscribed(&room, ctx.connection) {
                return Err(EventError::AuthorizationDenied("not subscribed to the channel's server"));
            }
            broadcast::broadcast_to_room(
                &state.sessions,
                &state.rooms,
                &room,
                &event(Some(channel_id)),
                Exclude::User(&user_id),
            );
        }
        (None, Some(target)) => {
            broadcast::send_to_user(&state.sessions, &target, &event(None));
        }
        (None, None) => {
            return Err(EventError::Validation("typing needs channelId or dmUserId"));
        }
    }
    Ok(())
}
