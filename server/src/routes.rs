use axum::{extract::State, Json, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Upgrade attempts per IP: one token every 2 seconds, burst of 10
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let ws_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(2)
            .burst_size(10)
            .finish()
            .expect("static governor config is valid"),
    );
    let ws_limiter = ws_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            ws_limiter.retain_recent();
        }
    });

    // WebSocket endpoint (auth via query param or bearer header, checked after upgrade)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: ws_governor_config,
        });

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Liveness plus a snapshot of in-memory load.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.sessions.connection_count(),
        "users": state.sessions.user_count(),
        "rooms": state.rooms.room_count(),
        "presence_tracked": state.presence.tracked_users(),
    }))
}
