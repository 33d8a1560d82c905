//! Session registry: which user owns which live connection.
//!
//! Two sharded maps kept in step:
//! - `connections`: ConnectionId -> (owner, outbound queue)
//! - `users`: UserId -> set of ConnectionId
//!
//! A user entry exists iff the set is non-empty. Registration takes the
//! user entry before touching `connections`; unregistration never holds both.

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ConnectionSender;
use crate::models::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One live connection and the user it was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: ConnectionId::next(),
            user_id,
        }
    }
}

struct ConnectionEntry {
    user_id: UserId,
    sender: ConnectionSender,
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: UserId,
    /// The user has no live connections left.
    pub was_last: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    users: DashMap<UserId, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this is the user's first live connection.
    pub fn register(&self, handle: &ConnectionHandle, sender: ConnectionSender) -> bool {
        let mut owned = self.users.entry(handle.user_id.clone()).or_default();
        let first = owned.is_empty();
        self.connections.insert(
            handle.id,
            ConnectionEntry {
                user_id: handle.user_id.clone(),
                sender,
            },
        );
        owned.insert(handle.id);

        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            connections = owned.len(),
            "Connection registered"
        );
        first
    }

    /// Remove a connection. `None` if it was already gone.
    ///
    /// This is the only place that decides a user went from some connections
    /// to none; the per-user entry lock makes that decision exactly once.
    pub fn unregister(&self, id: ConnectionId) -> Option<Unregistered> {
        let (_, entry) = self.connections.remove(&id)?;

        let was_last = match self.users.entry(entry.user_id.clone()) {
            Entry::Occupied(mut owned) => {
                owned.get_mut().remove(&id);
                if owned.get().is_empty() {
                    owned.remove();
                    true
                } else {
                    false
                }
            }
            // Someone else already reported this user gone
            Entry::Vacant(_) => false,
        };

        tracing::debug!(
            user_id = %entry.user_id,
            connection_id = %id,
            was_last,
            "Connection unregistered"
        );
        Some(Unregistered {
            user_id: entry.user_id,
            was_last,
        })
    }

    pub fn owner_of(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).map(|e| e.user_id.clone())
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn connections_for(&self, user_id: &UserId) -> HashSet<ConnectionId> {
        self.users
            .get(user_id)
            .map(|owned| owned.clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Queue a frame on one connection. False if the connection is gone or
    /// its writer has stopped.
    pub fn send(&self, id: ConnectionId, msg: Message) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.sender.send(msg).is_ok(),
            None => false,
        }
    }

    /// Queue a frame on every connection of `user_id`. Returns how many accepted it.
    pub fn send_to_user(&self, user_id: &UserId, msg: &Message) -> usize {
        self.connections_for(user_id)
            .into_iter()
            .filter(|id| self.send(*id, msg.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(registry: &SessionRegistry, user: &str) -> (ConnectionHandle, bool, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(UserId::from(user));
        let first = registry.register(&handle, tx);
        (handle, first, rx)
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn last_connection_detected_once() {
        let registry = SessionRegistry::new();
        let mut handles = Vec::new();
        for i in 0..4 {
            let (handle, first, _rx) = connect(&registry, "alice");
            assert_eq!(first, i == 0);
            handles.push(handle);
        }

        let last = handles.pop().unwrap();
        for handle in &handles {
            let gone = registry.unregister(handle.id).unwrap();
            assert!(!gone.was_last);
            assert!(registry.is_online(&UserId::from("alice")));
        }

        let gone = registry.unregister(last.id).unwrap();
        assert!(gone.was_last);
        assert!(!registry.is_online(&UserId::from("alice")));
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _, _rx) = connect(&registry, "bob");
        assert!(registry.unregister(handle.id).is_some());
        assert!(registry.unregister(handle.id).is_none());
        assert!(registry.owner_of(handle.id).is_none());
    }

    #[test]
    fn send_to_user_reaches_every_connection() {
        let registry = SessionRegistry::new();
        let (_, _, mut rx1) = connect(&registry, "carol");
        let (_, _, mut rx2) = connect(&registry, "carol");
        let (_, _, mut other) = connect(&registry, "dave");

        let sent = registry.send_to_user(&UserId::from("carol"), &Message::Text("hi".into()));
        assert_eq!(sent, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn send_to_closed_receiver_fails() {
        let registry = SessionRegistry::new();
        let (handle, _, rx) = connect(&registry, "erin");
        drop(rx);
        assert!(!registry.send(handle.id, Message::Text("x".into())));
    }
}
