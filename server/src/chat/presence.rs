//! Presence coordinator.
//!
//! Transitions for one user run one at a time under that user's ledger lock.
//! Each transition is checked against the session registry when it finally
//! runs: going ONLINE needs a live connection, going OFFLINE needs none, and
//! nothing is published twice in a row. A user with no ledger entry counts
//! as OFFLINE.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{PresenceStatus, UserId};
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::ServerEvent;

type Slot = Arc<Mutex<Option<PresenceStatus>>>;

/// Last published status per user.
#[derive(Default)]
pub struct PresenceLedger {
    users: DashMap<UserId, Slot>,
}

impl PresenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &UserId) -> Slot {
        self.users.entry(user_id.clone()).or_default().clone()
    }

    /// Forget OFFLINE users nobody is waiting on.
    fn release(&self, user_id: &UserId) {
        self.users.remove_if(user_id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .is_ok_and(|status| status.unwrap_or(PresenceStatus::Offline) == PresenceStatus::Offline)
        });
    }

    pub async fn published(&self, user_id: &UserId) -> PresenceStatus {
        let Some(slot) = self.users.get(user_id).map(|s| s.clone()) else {
            return PresenceStatus::Offline;
        };
        let status = slot.lock().await.unwrap_or(PresenceStatus::Offline);
        status
    }

    /// Users with a ledger entry: online, or with a transition in flight.
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

pub async fn mark_online(state: &AppState, user_id: &UserId) -> bool {
    transition(state, user_id, PresenceStatus::Online).await
}

pub async fn mark_offline(state: &AppState, user_id: &UserId) -> bool {
    transition(state, user_id, PresenceStatus::Offline).await
}

/// Returns whether the transition was published.
async fn transition(state: &AppState, user_id: &UserId, target: PresenceStatus) -> bool {
    let slot = state.presence.slot(user_id);
    let published = {
        let mut last = slot.lock().await;
        let live = state.sessions.is_online(user_id);
        let consistent = match target {
            PresenceStatus::Online => live,
            PresenceStatus::Offline => !live,
        };
        let current = last.unwrap_or(PresenceStatus::Offline);

        if !consistent || current == target {
            tracing::debug!(
                user_id = %user_id,
                target = %target,
                current = %current,
                live,
                "Presence transition skipped"
            );
            false
        } else {
            publish(state, user_id, target).await;
            *last = Some(target);
            true
        }
    };
    drop(slot);
    state.presence.release(user_id);
    published
}

async fn publish(state: &AppState, user_id: &UserId, status: PresenceStatus) {
    if let Err(e) = state.directory.set_presence(user_id, status).await {
        tracing::warn!(
            user_id = %user_id,
            status = %status,
            error = %e,
            "Failed to persist presence, notifying friends anyway"
        );
    }

    let friends = match state.directory.friends_of(user_id).await {
        Ok(friends) => friends,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                status = %status,
                error = %e,
                "Failed to load friends for presence broadcast"
            );
            return;
        }
    };

    let event = ServerEvent::FriendStatus {
        user_id: user_id.clone(),
        status,
    };
    let delivered = broadcast::send_to_users(&state.sessions, friends.iter(), &event);
    tracing::info!(
        user_id = %user_id,
        status = %status,
        friends = friends.len(),
        delivered,
        "Presence published"
    );
}
