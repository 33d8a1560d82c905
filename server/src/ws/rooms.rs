//! Room membership index.
//!
//! `rooms` answers "who is in this room", `joined` answers "which rooms is
//! this connection in" so teardown is proportional to the rooms a connection
//! actually joined. Lock order is always `joined` entry, then `rooms` entry.
//!
//! A connection must be attached before it can join anything. `leave_all`
//! detaches it, after which joins are refused.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

use super::session::ConnectionId;
use crate::models::RoomId;

#[derive(Default)]
pub struct RoomIndex {
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, id: ConnectionId) {
        self.joined.entry(id).or_default();
    }

    /// Subscribe `id` to `room`. Idempotent. False if the connection is not
    /// attached (never was, or already torn down).
    pub fn join(&self, room: &RoomId, id: ConnectionId) -> bool {
        let Some(mut joined) = self.joined.get_mut(&id) else {
            return false;
        };
        joined.insert(room.clone());
        self.rooms.entry(room.clone()).or_default().insert(id);
        true
    }

    /// Returns whether the connection was in the room.
    pub fn leave(&self, room: &RoomId, id: ConnectionId) -> bool {
        let Some(mut joined) = self.joined.get_mut(&id) else {
            return false;
        };
        if !joined.remove(room) {
            return false;
        }
        self.remove_from_room(room, id);
        true
    }

    /// Remove the connection from every room and detach it. Returns the rooms
    /// it was in; empty on a second call.
    pub fn leave_all(&self, id: ConnectionId) -> HashSet<RoomId> {
        let Some((_, joined)) = self.joined.remove(&id) else {
            return HashSet::new();
        };
        for room in &joined {
            self.remove_from_room(room, id);
        }
        joined
    }

    fn remove_from_room(&self, room: &RoomId, id: ConnectionId) {
        if let Entry::Occupied(mut members) = self.rooms.entry(room.clone()) {
            members.get_mut().remove(&id);
            if members.get().is_empty() {
                members.remove();
            }
        }
    }

    pub fn members_of(&self, room: &RoomId) -> HashSet<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, room: &RoomId, id: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
