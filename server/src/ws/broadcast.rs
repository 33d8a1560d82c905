//! Fan-out helpers. Each event is serialized once and the frame is cloned per
//! recipient. Delivery is best-effort: handles that vanished between the
//! membership snapshot and the send are skipped.

use axum::extract::ws::Message;
use std::collections::HashSet;

use super::protocol::{self, ServerEvent};
use super::rooms::RoomIndex;
use super::session::{ConnectionId, SessionRegistry};
use crate::models::{RoomId, UserId};

/// Who to leave out of a room broadcast.
#[derive(Debug, Clone, Copy)]
pub enum Exclude<'a> {
    Nobody,
    Connection(ConnectionId),
    /// Every connection owned by this user.
    User(&'a UserId),
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match protocol::encode(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server event");
            None
        }
    }
}

fn deliver(registry: &SessionRegistry, targets: impl IntoIterator<Item = ConnectionId>, frame: &Message) -> usize {
    targets
        .into_iter()
        .filter(|id| registry.send(*id, frame.clone()))
        .count()
}

/// Send to every live connection of `user_id`.
pub fn send_to_user(registry: &SessionRegistry, user_id: &UserId, event: &ServerEvent) -> usize {
    match encode(event) {
        Some(frame) => registry.send_to_user(user_id, &frame),
        None => 0,
    }
}

/// Send to the union of several users' connections, each connection once.
pub fn send_to_users<'a>(
    registry: &SessionRegistry,
    users: impl IntoIterator<Item = &'a UserId>,
    event: &ServerEvent,
) -> usize {
    let Some(frame) = encode(event) else {
        return 0;
    };
    let targets: HashSet<ConnectionId> = users
        .into_iter()
        .flat_map(|user| registry.connections_for(user))
        .collect();
    deliver(registry, targets, &frame)
}

pub fn broadcast_to_room(
    registry: &SessionRegistry,
    rooms: &RoomIndex,
    room: &RoomId,
    event: &ServerEvent,
    exclude: Exclude<'_>,
) -> usize {
    let members = rooms.members_of(room);
    if members.is_empty() {
        return 0;
    }
    let Some(frame) = encode(event) else {
        return 0;
    };

    let skipped: HashSet<ConnectionId> = match exclude {
        Exclude::Nobody => HashSet::new(),
        Exclude::Connection(id) => HashSet::from([id]),
        Exclude::User(user) => registry.connections_for(user),
    };

    let sent = deliver(
        registry,
        members.into_iter().filter(|id| !skipped.contains(id)),
        &frame,
    );
    tracing::trace!(room = %room, recipients = sent, "Room broadcast");
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::session::ConnectionHandle;
    use tokio::sync::mpsc;

    struct Conn {
        handle: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    fn connect(registry: &SessionRegistry, rooms: &RoomIndex, user: &str, room: &RoomId) -> Conn {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(UserId::from(user));
        rooms.attach(handle.id);
        registry.register(&handle, tx);
        rooms.join(room, handle.id);
        Conn { handle, rx }
    }

    fn drain(conn: &mut Conn) -> usize {
        let mut n = 0;
        while conn.rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    fn event() -> ServerEvent {
        ServerEvent::CallEnded { from: UserId::from("x") }
    }

    #[test]
    fn room_broadcast_honours_exclusions() {
        let registry = SessionRegistry::new();
        let rooms = RoomIndex::new();
        let room = RoomId::server("s1");
        let mut a1 = connect(&registry, &rooms, "a", &room);
        let mut a2 = connect(&registry, &rooms, "a", &room);
        let mut b = connect(&registry, &rooms, "b", &room);

        assert_eq!(broadcast_to_room(&registry, &rooms, &room, &event(), Exclude::Nobody), 3);
        assert_eq!((drain(&mut a1), drain(&mut a2), drain(&mut b)), (1, 1, 1));

        let sent = broadcast_to_room(&registry, &rooms, &room, &event(), Exclude::Connection(a1.handle.id));
        assert_eq!(sent, 2);
        assert_eq!((drain(&mut a1), drain(&mut a2), drain(&mut b)), (0, 1, 1));

        let a = UserId::from("a");
        let sent = broadcast_to_room(&registry, &rooms, &room, &event(), Exclude::User(&a));
        assert_eq!(sent, 1);
        assert_eq!((drain(&mut a1), drain(&mut a2), drain(&mut b)), (0, 0, 1));
    }

    #[test]
    fn union_delivers_each_connection_once() {
        let registry = SessionRegistry::new();
        let rooms = RoomIndex::new();
        let room = RoomId::server("s1");
        let mut a = connect(&registry, &rooms, "a", &room);
        let mut b = connect(&registry, &rooms, "b", &room);

        let (ua, ub) = (UserId::from("a"), UserId::from("b"));
        let sent = send_to_users(&registry, [&ua, &ub, &ua], &event());
        assert_eq!(sent, 2);
        assert_eq!((drain(&mut a), drain(&mut b)), (1, 1));
    }

    #[test]
    fn unregistered_members_are_skipped() {
        let registry = SessionRegistry::new();
        let rooms = RoomIndex::new();
        let room = RoomId::server("s1");
        let gone = connect(&registry, &rooms, "a", &room);
        let mut live = connect(&registry, &rooms, "b", &room);

        registry.unregister(gone.handle.id);
        assert_eq!(broadcast_to_room(&registry, &rooms, &room, &event(), Exclude::Nobody), 1);
        assert_eq!(drain(&mut live), 1);
    }
}
