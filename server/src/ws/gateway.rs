//! Connection gateway: the only code that creates or destroys connection
//! state. Transport-free so it can be driven directly in tests.

use crate::chat::presence;
use crate::error::AuthError;
use crate::state::AppState;
use crate::voice::signaling;
use crate::ws::session::ConnectionHandle;
use crate::ws::ConnectionSender;

/// Authenticate a new connection and wire it into the registry and its rooms.
///
/// Every directory call happens before the first mutation, so a rejected
/// handshake leaves no trace.
pub async fn accept(
    state: &AppState,
    token: Option<&str>,
    sender: ConnectionSender,
) -> Result<ConnectionHandle, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidToken)?;
    let user_id = state.directory.verify_token(token).await?;
    let rooms = state
        .directory
        .rooms_for_user(&user_id)
        .await
        .map_err(AuthError::Upstream)?;

    let handle = ConnectionHandle::new(user_id);
    state.rooms.attach(handle.id);
    let first = state.sessions.register(&handle, sender);
    for room in &rooms {
        state.rooms.join(room, handle.id);
    }

    tracing::info!(
        user_id = %handle.user_id,
        connection_id = %handle.id,
        rooms = rooms.len(),
        first,
        "Connection accepted"
    );

    if first {
        presence::mark_online(state, &handle.user_id).await;
    }
    Ok(handle)
}

/// Tear a connection down. Safe to call more than once.
pub async fn disconnect(state: &AppState, handle: &ConnectionHandle) {
    let left = state.rooms.leave_all(handle.id);
    for room in left.iter().filter(|room| room.is_voice()) {
        signaling::announce_left(state, &handle.user_id, room);
    }

    let Some(gone) = state.sessions.unregister(handle.id) else {
        return;
    };
    tracing::info!(
        user_id = %gone.user_id,
        connection_id = %handle.id,
        rooms = left.len(),
        last = gone.was_last,
        "Connection closed"
    );

    if gone.was_last {
        presence::mark_offline(state, &gone.user_id).await;
    }
}
