//! Direct messages between accepted friends.

use super::messages::validate_content;
use super::router::EventContext;
use crate::error::EventError;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::{DmSend, ServerEvent};

/// Delivered to every connection of the receiver and echoed to every
/// connection of the sender, so the sender's other devices stay in sync.
pub async fn send_dm(state: &AppState, ctx: &EventContext, req: DmSend) -> Result<(), EventError> {
    let sender = ctx.sender(state)?;
    let content = validate_content(&req.content, state.limits.max_message_chars)?;
    ctx.check_rate()?;

    if !state.directory.are_friends(&sender, &req.receiver_id).await? {
        return Err(EventError::AuthorizationDenied("not friends"));
    }

    let dm = state
        .directory
        .persist_direct_message(&sender, &req.receiver_id, content)
        .await?;

    let delivered = broadcast::send_to_users(
        &state.sessions,
        [&req.receiver_id, &sender],
        &ServerEvent::DmNew(dm),
    );
    tracing::debug!(
        user_id = %sender,
        receiver_id = %req.receiver_id,
        delivered,
        "Direct message sent"
    );
    Ok(())
}
