//! Event router: decodes one inbound frame, authorizes it and hands it to
//! the matching handler. Failures are logged here and never reach the client.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use super::{dm, messages, typing};
use crate::error::EventError;
use crate::models::UserId;
use crate::state::AppState;
use crate::voice::signaling::{self, CallAction};
use crate::ws::protocol::{self, ClientEvent};
use crate::ws::session::ConnectionId;

/// Per-connection state the router needs between events.
pub struct EventContext {
    pub connection: ConnectionId,
    limiter: DefaultDirectRateLimiter,
}

impl EventContext {
    pub fn new(connection: ConnectionId, quota: Quota) -> Self {
        Self {
            connection,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// The user this connection is registered to. Re-read for every event so
    /// a torn-down connection cannot act.
    pub fn sender(&self, state: &AppState) -> Result<UserId, EventError> {
        state
            .sessions
            .owner_of(self.connection)
            .ok_or(EventError::Unauthenticated)
    }

    /// Spend one unit of the message quota.
    pub fn check_rate(&self) -> Result<(), EventError> {
        self.limiter.check().map_err(|_| EventError::RateLimited)
    }
}

/// Decode and dispatch a text frame, logging anything that goes wrong.
pub async fn handle_frame(state: &AppState, ctx: &EventContext, text: &str) {
    let event = match protocol::decode(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                connection_id = %ctx.connection,
                error = %e,
                "Dropping undecodable frame"
            );
            return;
        }
    };

    let name = event.name();
    if let Err(e) = dispatch(state, ctx, event).await {
        log_rejection(ctx, name, &e);
    }
}

pub async fn dispatch(
    state: &AppState,
    ctx: &EventContext,
    event: ClientEvent,
) -> Result<(), EventError> {
    match event {
        ClientEvent::MessageSend(req) => messages::send_message(state, ctx, req).await,
        ClientEvent::MessageDelete(req) => messages::delete_message(state, ctx, req).await,
        ClientEvent::DmSend(req) => dm::send_dm(state, ctx, req).await,
        ClientEvent::TypingStart(req) => typing::relay_typing(state, ctx, req, true).await,
        ClientEvent::TypingStop(req) => typing::relay_typing(state, ctx, req, false).await,
        ClientEvent::VoiceJoin(req) => signaling::join_voice(state, ctx, req.channel_id).await,
        ClientEvent::VoiceLeave(req) => signaling::leave_voice(state, ctx, req.channel_id).await,
        ClientEvent::VoiceSignal(req) => signaling::relay_voice_signal(state, ctx, req),
        ClientEvent::CallSignal(req) => signaling::relay_call_signal(state, ctx, req),
        ClientEvent::CallStart(req) => signaling::relay_call(state, ctx, req.to, CallAction::Start),
        ClientEvent::CallAccept(req) => signaling::relay_call(state, ctx, req.to, CallAction::Accept),
        ClientEvent::CallDecline(req) => {
            signaling::relay_call(state, ctx, req.to, CallAction::Decline)
        }
        ClientEvent::CallEnd(req) => signaling::relay_call(state, ctx, req.to, CallAction::End),
    }
}

fn log_rejection(ctx: &EventContext, event: &'static str, err: &EventError) {
    match err {
        EventError::UpstreamUnavailable(_) => tracing::warn!(
            connection_id = %ctx.connection,
            event,
            error = %err,
            "Event aborted"
        ),
        _ => tracing::debug!(
            connection_id = %ctx.connection,
            event,
            error = %err,
            "Event rejected"
        ),
    }
}
