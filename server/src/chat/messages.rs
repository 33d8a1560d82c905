//! Channel messages: send and delete.

use super::router::EventContext;
use crate::error::EventError;
use crate::state::AppState;
use crate::ws::broadcast::{self, Exclude};
use crate::ws::protocol::{MessageDelete, MessageSend, ServerEvent};

/// Returns the trimmed text, which is both what is measured and what gets stored.
pub fn validate_content(raw: &str, max_chars: usize) -> Result<&str, EventError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EventError::Validation("message is empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(EventError::Validation("message too long"));
    }
    Ok(trimmed)
}

pub async fn send_message(
    state: &AppState,
    ctx: &EventContext,
    req: MessageSend,
) -> Result<(), EventError> {
    let sender = ctx.sender(state)?;
    let content = validate_content(&req.content, state.limits.max_message_chars)?;
    ctx.check_rate()?;

    let channel = state
        .directory
        .channel(&req.channel_id)
        .await?
        .ok_or(EventError::NotFound("channel"))?;
    let room = channel.server_room();
    if !state.directory.is_member(&sender, &room).await? {
        return Err(EventError::AuthorizationDenied("not a member of the channel's server"));
    }

    let message = state
        .directory
        .persist_channel_message(&channel, &sender, content)
        .await?;
    let message_id = message.id.clone();

    let delivered = broadcast::broadcast_to_room(
        &state.sessions,
        &state.rooms,
        &room,
        &ServerEvent::MessageNew(message),
        Exclude::Nobody,
    );
    tracing::debug!(
        user_id = %sender,
        room = %room,
        message_id = %message_id,
        delivered,
        "Channel message sent"
    );
    Ok(())
}

pub async fn delete_message(
    state: &AppState,
    ctx: &EventContext,
    req: MessageDelete,
) -> Result<(), EventError> {
    let requester = ctx.sender(state)?;

    let message = state
        .directory
        .find_message(&req.message_id)
        .await?
        .ok_or(EventError::NotFound("message"))?;
    if message.sender_id != requester {
        return Err(EventError::AuthorizationDenied("not the message author"));
    }
    let channel = state
        .directory
        .channel(&message.channel_id)
        .await?
        .ok_or(EventError::NotFound("channel"))?;

    state
        .directory
        .delete_message(&message.id, &requester)
        .await?;

    let room = channel.server_room();
    broadcast::broadcast_to_room(
        &state.sessions,
        &state.rooms,
        &room,
        &ServerEvent::MessageDeleted {
            message_id: message.id,
            channel_id: channel.id,
        },
        Exclude::Nobody,
    );
    tracing::debug!(user_id = %requester, room = %room, "Channel message deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed() {
        assert_eq!(validate_content("  hi  ", 2000).unwrap(), "hi");
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(matches!(
            validate_content(" \n\t ", 2000),
            Err(EventError::Validation(_))
        ));
        assert!(validate_content("", 2000).is_err());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let at_limit = "é".repeat(2000);
        assert!(validate_content(&at_limit, 2000).is_ok());
        let over = "a".repeat(2001);
        assert!(validate_content(&over, 2000).is_err());
    }

    #[test]
    fn surrounding_whitespace_does_not_count_toward_limit() {
        let padded = format!("  {}\n", "a".repeat(2000));
        assert_eq!(validate_content(&padded, 2000).unwrap().chars().count(), 2000);
        let padded_over = format!(" {} ", "a".repeat(2001));
        assert!(validate_content(&padded_over, 2000).is_err());
    }
}
