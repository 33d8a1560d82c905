//! SQLite-backed directory.
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool and
//! holds the connection lock only for the duration of its statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

use super::{Directory, DirectoryError};
use crate::auth::jwt;
use crate::db::DbPool;
use crate::models::{
    Channel, ChannelKind, DirectMessage, Message, PresenceStatus, RoomId, UserId, UserSummary,
};

#[derive(Clone)]
pub struct SqliteDirectory {
    db: DbPool,
    jwt_secret: Vec<u8>,
}

impl SqliteDirectory {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        Self { db, jwt_secret }
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DirectoryError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| DirectoryError::Unavailable(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| DirectoryError::Unavailable(format!("Task join: {}", e)))?
    }
}

fn db_err(e: rusqlite::Error) -> DirectoryError {
    DirectoryError::Unavailable(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DirectoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DirectoryError::Unavailable(format!("corrupt timestamp {:?}: {}", raw, e)))
}

fn load_user_summary(conn: &Connection, user_id: &str) -> Result<UserSummary, DirectoryError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT username, status FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;

    let (username, status) = row.ok_or(DirectoryError::NotFound)?;
    Ok(UserSummary {
        id: UserId::new(user_id),
        username,
        status: PresenceStatus::from_db(&status).unwrap_or(PresenceStatus::Offline),
    })
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn verify_token(&self, token: &str) -> Result<UserId, DirectoryError> {
        let claims = jwt::validate_access_token(&self.jwt_secret, token)?;

        // Tokens for deleted accounts stay cryptographically valid until expiry
        let user_id = claims.user_id;
        self.with_conn(move |conn| {
            let exists = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", params![user_id], |_| Ok(()))
                .optional()
                .map_err(db_err)?
                .is_some();
            if exists {
                Ok(UserId::new(user_id))
            } else {
                Err(DirectoryError::InvalidToken)
            }
        })
        .await
    }

    async fn rooms_for_user(&self, user_id: &UserId) -> Result<HashSet<RoomId>, DirectoryError> {
        let user_id = user_id.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT server_id FROM server_members WHERE user_id = ?1")
                .map_err(db_err)?;
            let rooms = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .map(|r| r.map(RoomId::Server).map_err(db_err))
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(rooms)
        })
        .await
    }

    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, DirectoryError> {
        let channel_id = channel_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT id, server_id, name, kind FROM channels WHERE id = ?1",
                    params![channel_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(db_err)?;

            Ok(row.map(|(id, server_id, name, kind)| Channel {
                id,
                server_id,
                name,
                kind: ChannelKind::from_db(&kind).unwrap_or(ChannelKind::Text),
            }))
        })
        .await
    }

    async fn is_member(&self, user_id: &UserId, room: &RoomId) -> Result<bool, DirectoryError> {
        let user_id = user_id.as_str().to_string();
        let room = room.clone();
        self.with_conn(move |conn| {
            let found = match &room {
                RoomId::Server(server_id) => conn
                    .query_row(
                        "SELECT 1 FROM server_members WHERE server_id = ?1 AND user_id = ?2",
                        params![server_id, user_id],
                        |_| Ok(()),
                    )
                    .optional(),
                RoomId::Voice(channel_id) => conn
                    .query_row(
                        "SELECT 1 FROM channels c
                         JOIN server_members m ON m.server_id = c.server_id
                         WHERE c.id = ?1 AND m.user_id = ?2",
                        params![channel_id, user_id],
                        |_| Ok(()),
                    )
                    .optional(),
            }
            .map_err(db_err)?;
            Ok(found.is_some())
        })
        .await
    }

    async fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, DirectoryError> {
        let (a, b) = (a.as_str().to_string(), b.as_str().to_string());
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM friends
                     WHERE status = 'ACCEPTED'
                       AND ((user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))
                     LIMIT 1",
                    params![a, b],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_err)?;
            Ok(found.is_some())
        })
        .await
    }

    async fn persist_channel_message(
        &self,
        channel: &Channel,
        sender_id: &UserId,
        content: &str,
    ) -> Result<Message, DirectoryError> {
        let channel_id = channel.id.clone();
        let sender_id = sender_id.as_str().to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let sender = load_user_summary(conn, &sender_id)?;
            let id = uuid::Uuid::now_v7().to_string();
            let created_at = Utc::now();

            conn.execute(
                "INSERT INTO messages (id, channel_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, channel_id, sender_id, content, created_at.to_rfc3339()],
            )
            .map_err(db_err)?;

            Ok(Message {
                id,
                channel_id,
                sender_id: sender.id.clone(),
                content,
                created_at,
                sender,
            })
        })
        .await
    }

    async fn persist_direct_message(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        content: &str,
    ) -> Result<DirectMessage, DirectoryError> {
        let sender_id = sender_id.as_str().to_string();
        let receiver_id = receiver_id.clone();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let sender = load_user_summary(conn, &sender_id)?;
            let id = uuid::Uuid::now_v7().to_string();
            let created_at = Utc::now();

            conn.execute(
                "INSERT INTO direct_messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, sender_id, receiver_id.as_str(), content, created_at.to_rfc3339()],
            )
            .map_err(db_err)?;

            Ok(DirectMessage {
                id,
                sender_id: sender.id.clone(),
                receiver_id,
                content,
                created_at,
                sender,
            })
        })
        .await
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, DirectoryError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT channel_id, sender_id, content, created_at FROM messages WHERE id = ?1",
                    params![message_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(db_err)?;

            let Some((channel_id, sender_id, content, created_at)) = row else {
                return Ok(None);
            };
            let sender = load_user_summary(conn, &sender_id)?;
            Ok(Some(Message {
                id: message_id,
                channel_id,
                sender_id: sender.id.clone(),
                content,
                created_at: parse_timestamp(&created_at)?,
                sender,
            }))
        })
        .await
    }

    async fn delete_message(
        &self,
        message_id: &str,
        requesting_user: &UserId,
    ) -> Result<(), DirectoryError> {
        let message_id = message_id.to_string();
        let requesting_user = requesting_user.as_str().to_string();
        self.with_conn(move |conn| {
            let sender: Option<String> = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1",
                    params![message_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            match sender {
                None => Err(DirectoryError::NotFound),
                Some(sender) if sender != requesting_user => Err(DirectoryError::Forbidden),
                Some(_) => {
                    conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])
                        .map_err(db_err)?;
                    Ok(())
                }
            }
        })
        .await
    }

    async fn friends_of(&self, user_id: &UserId) -> Result<HashSet<UserId>, DirectoryError> {
        let user_id = user_id.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT CASE WHEN user_id = ?1 THEN friend_id ELSE user_id END
                     FROM friends
                     WHERE status = 'ACCEPTED' AND (user_id = ?1 OR friend_id = ?1)",
                )
                .map_err(db_err)?;
            let friends = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .map(|r| r.map(UserId::new).map_err(db_err))
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(friends)
        })
        .await
    }

    async fn set_presence(
        &self,
        user_id: &UserId,
        status: PresenceStatus,
    ) -> Result<(), DirectoryError> {
        let user_id = user_id.as_str().to_string();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE users SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), user_id],
                )
                .map_err(db_err)?;
            if updated == 0 {
                return Err(DirectoryError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection) {
        let now = Utc::now().to_rfc3339();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                params![id, name, now],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO servers (id, name, owner_id, created_at) VALUES ('s1', 'Guild', 'alice', ?1)",
            params![now],
        )
        .unwrap();
        for user in ["alice", "bob"] {
            conn.execute(
                "INSERT INTO server_members (server_id, user_id, joined_at) VALUES ('s1', ?1, ?2)",
                params![user, now],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO channels (id, server_id, name, kind, created_at) VALUES ('general', 's1', 'general', 'TEXT', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO channels (id, server_id, name, kind, created_at) VALUES ('lounge', 's1', 'lounge', 'VOICE', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO friends (id, user_id, friend_id, status, created_at) VALUES ('f1', 'alice', 'bob', 'ACCEPTED', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO friends (id, user_id, friend_id, status, created_at) VALUES ('f2', 'carol', 'alice', 'PENDING', ?1)",
            params![now],
        )
        .unwrap();
    }

    fn directory() -> (SqliteDirectory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init_db(dir.path().to_str().unwrap()).unwrap();
        seed(&pool.lock().unwrap());
        (SqliteDirectory::new(pool, b"secret".to_vec()), dir)
    }

    #[tokio::test]
    async fn membership_and_rooms() {
        let (dir, _tmp) = directory();
        let alice = UserId::from("alice");
        let carol = UserId::from("carol");

        let rooms = dir.rooms_for_user(&alice).await.unwrap();
        assert_eq!(rooms, HashSet::from([RoomId::server("s1")]));
        assert!(dir.rooms_for_user(&carol).await.unwrap().is_empty());

        assert!(dir.is_member(&alice, &RoomId::server("s1")).await.unwrap());
        assert!(!dir.is_member(&carol, &RoomId::server("s1")).await.unwrap());
        assert!(dir.is_member(&alice, &RoomId::voice("lounge")).await.unwrap());
        assert!(!dir.is_member(&carol, &RoomId::voice("lounge")).await.unwrap());
    }

    #[tokio::test]
    async fn friendship_requires_accepted_status() {
        let (dir, _tmp) = directory();
        let (alice, bob, carol) = (UserId::from("alice"), UserId::from("bob"), UserId::from("carol"));

        assert!(dir.are_friends(&bob, &alice).await.unwrap());
        assert!(!dir.are_friends(&alice, &carol).await.unwrap());
        assert_eq!(dir.friends_of(&alice).await.unwrap(), HashSet::from([bob.clone()]));
        assert!(dir.friends_of(&carol).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_lookup() {
        let (dir, _tmp) = directory();
        let channel = dir.channel("lounge").await.unwrap().unwrap();
        assert_eq!(channel.server_id, "s1");
        assert_eq!(channel.kind, ChannelKind::Voice);
        assert!(dir.channel("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persist_find_and_delete_message() {
        let (dir, _tmp) = directory();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let channel = dir.channel("general").await.unwrap().unwrap();

        let msg = dir.persist_channel_message(&channel, &alice, "hello").await.unwrap();
        assert_eq!(msg.sender.username, "Alice");

        let found = dir.find_message(&msg.id).await.unwrap().unwrap();
        assert_eq!(found.content, "hello");
        assert_eq!(found.channel_id, "general");

        assert_eq!(
            dir.delete_message(&msg.id, &bob).await.unwrap_err(),
            DirectoryError::Forbidden
        );
        dir.delete_message(&msg.id, &alice).await.unwrap();
        assert!(dir.find_message(&msg.id).await.unwrap().is_none());
        assert_eq!(
            dir.delete_message(&msg.id, &alice).await.unwrap_err(),
            DirectoryError::NotFound
        );
    }

    #[tokio::test]
    async fn persist_direct_message_embeds_sender() {
        let (dir, _tmp) = directory();
        let dm = dir
            .persist_direct_message(&UserId::from("alice"), &UserId::from("bob"), "psst")
            .await
            .unwrap();
        assert_eq!(dm.receiver_id, UserId::from("bob"));
        assert_eq!(dm.sender.id, UserId::from("alice"));
    }

    #[tokio::test]
    async fn presence_is_durable() {
        let (dir, _tmp) = directory();
        let alice = UserId::from("alice");
        dir.set_presence(&alice, PresenceStatus::Online).await.unwrap();

        let channel = dir.channel("general").await.unwrap().unwrap();
        let msg = dir.persist_channel_message(&channel, &alice, "x").await.unwrap();
        assert_eq!(msg.sender.status, PresenceStatus::Online);

        assert_eq!(
            dir.set_presence(&UserId::from("ghost"), PresenceStatus::Online)
                .await
                .unwrap_err(),
            DirectoryError::NotFound
        );
    }

    #[tokio::test]
    async fn verify_token_requires_existing_user() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let (dir, _tmp) = directory();
        let now = Utc::now().timestamp();
        let make = |user: &str| {
            let claims = jwt::Claims { user_id: user.to_string(), iat: now, exp: now + 600 };
            encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap()
        };

        assert_eq!(dir.verify_token(&make("alice")).await.unwrap(), UserId::from("alice"));
        assert_eq!(
            dir.verify_token(&make("ghost")).await.unwrap_err(),
            DirectoryError::InvalidToken
        );
    }
}
