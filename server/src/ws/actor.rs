use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, timeout};

use crate::chat::router::{self, EventContext};
use crate::state::AppState;
use crate::ws::gateway;
use crate::ws::session::ConnectionId;

/// Text frames waiting for the processor. Frames beyond this are dropped.
const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Run the actor-per-connection pattern for one WebSocket.
///
/// After the gateway accepts the connection it is served by four tasks:
/// - Writer: owns the sink, forwards the outbound queue the registry sends to
/// - Processor: runs inbound events through the router one at a time
/// - Ping: keepalive, closes with 1001 when a pong is overdue
/// - Reader (this task): socket -> processor queue, and teardown on close
///
/// Teardown starts as soon as the reader stops; it does not wait for the
/// processor to finish an in-flight event.
pub async fn run_connection(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = match gateway::accept(&state, token.as_deref(), tx.clone()).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(
                close_code = err.close_code(),
                reason = err.close_reason(),
                error = %err,
                "WebSocket auth failed"
            );
            // Upgrade already happened; close immediately with the error code
            let close_frame = CloseFrame {
                code: err.close_code(),
                reason: err.close_reason().into(),
            };
            let _ = socket.send(Message::Close(Some(close_frame))).await;
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = socket.split();
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Processor: sequential per connection, stops once the handle is gone
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Utf8Bytes>(INBOUND_QUEUE_CAPACITY);
    let ctx = EventContext::new(handle.id, state.limits.message_quota());
    let processor_state = state.clone();
    tokio::spawn(async move {
        while let Some(text) = inbound_rx.recv().await {
            if !processor_state.sessions.is_registered(ctx.connection) {
                break;
            }
            router::handle_frame(&processor_state, &ctx, text.as_str()).await;
        }
    });

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_interval = state.limits.ping_interval();
    let pong_timeout = state.limits.pong_timeout();
    let mut ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    tracing::info!(
        user_id = %handle.user_id,
        connection_id = %handle.id,
        "WebSocket actor started"
    );

    // Reader loop: feed text frames to the processor until the socket or keepalive ends
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut ping_handle => {
                tracing::info!(user_id = %handle.user_id, connection_id = %handle.id, "Keepalive ended");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if !enqueue_frame(&inbound_tx, handle.id, text) {
                        break;
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        connection_id = %handle.id,
                        "Ignoring binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %handle.user_id,
                        connection_id = %handle.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %handle.user_id,
                    connection_id = %handle.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %handle.user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    drop(inbound_tx);
    gateway::disconnect(&state, &handle).await;

    ping_handle.abort();
    writer_handle.abort();

    tracing::info!(
        user_id = %handle.user_id,
        connection_id = %handle.id,
        "WebSocket actor stopped"
    );
}

/// Hand a text frame to the processor without waiting. A full queue drops the
/// frame; returns false only once the processor is gone.
fn enqueue_frame(inbound: &mpsc::Sender<Utf8Bytes>, connection: ConnectionId, text: Utf8Bytes) -> bool {
    match inbound.try_send(text) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                connection_id = %connection,
                capacity = INBOUND_QUEUE_CAPACITY,
                "Inbound queue full, dropping frame"
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_inbound_queue_drops_frames_without_blocking() {
        let (tx, mut rx) = mpsc::channel::<Utf8Bytes>(2);
        let id = ConnectionId::next();

        for text in ["one", "two", "three", "four"] {
            assert!(enqueue_frame(&tx, id, text.into()));
        }

        assert_eq!(rx.recv().await.as_ref().map(Utf8Bytes::as_str), Some("one"));
        assert_eq!(rx.recv().await.as_ref().map(Utf8Bytes::as_str), Some("two"));
        assert!(rx.try_recv().is_err());

        // Room again once the processor catches up
        assert!(enqueue_frame(&tx, id, "five".into()));
        assert_eq!(rx.recv().await.as_ref().map(Utf8Bytes::as_str), Some("five"));
    }

    #[tokio::test]
    async fn closed_processor_stops_the_reader() {
        let (tx, rx) = mpsc::channel::<Utf8Bytes>(2);
        drop(rx);
        assert!(!enqueue_frame(&tx, ConnectionId::next(), "late".into()));
    }
}
