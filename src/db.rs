use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        members TEXT NOT NULL,
        admin TEXT,
        avatar TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id TEXT NOT NULL,
        sender TEXT NOT NULL,
        message_id TEXT NOT NULL UNIQUE,
        body TEXT NOT NULL,
        sent_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_by_room ON messages (room_id, seq)",
    "CREATE TABLE IF NOT EXISTS chat_notifications (
        chat_id TEXT NOT NULL,
        sender TEXT NOT NULL,
        receiver TEXT NOT NULL,
        unread INTEGER NOT NULL DEFAULT 0 CHECK (unread >= 0),
        last_at INTEGER NOT NULL,
        PRIMARY KEY (chat_id, sender, receiver)
    )",
    "CREATE TABLE IF NOT EXISTS request_notifications (
        sender TEXT NOT NULL,
        receiver TEXT NOT NULL,
        kind TEXT NOT NULL,
        group_id TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (sender, receiver, kind, group_id)
    )",
    "CREATE TABLE IF NOT EXISTS reactions (
        subject_kind TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        username TEXT NOT NULL,
        state TEXT NOT NULL,
        PRIMARY KEY (subject_kind, subject_id, username)
    )",
];

/// Creates every table the service needs; safe to run on every start.
pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Private,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        use RoomKind::*;
        match self {
            Private => "private",
            Group => "group",
        }
    }

    pub fn parse(raw: &str) -> Option<RoomKind> {
        match raw {
            "private" => Some(RoomKind::Private),
            "group" => Some(RoomKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: RoomKind,
    /// Sorted, no duplicates.
    pub members: Vec<String>,
    pub admin: Option<String>,
    pub avatar: String,
}

pub(crate) type RoomRow = (String, String, String, String, String, Option<String>, String);

pub(crate) const ROOM_COLUMNS: &str = "id,name,description,kind,members,admin,avatar";

impl Room {
    pub fn is_member(&self, user: &str) -> bool {
        self.members.binary_search_by(|m| m.as_str().cmp(user)).is_ok()
    }

    pub(crate) fn from_row((id, name, description, kind, members, admin, avatar): RoomRow) -> Result<Room, sqlx::Error> {
        Ok(Room {
            id: Uuid::parse_str(&id).map_err(decode_err)?,
            name,
            description,
            kind: RoomKind::parse(&kind)
                .ok_or_else(|| decode_err(format!("unknown room kind {kind:?}")))?,
            members: serde_json::from_str(&members).map_err(decode_err)?,
            admin: admin.filter(|a| !a.is_empty()),
            avatar,
        })
    }

    pub(crate) fn members_json(&self) -> String {
        // a Vec<String> always serializes
        serde_json::to_string(&self.members).unwrap_or_else(|_| "[]".to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub room_id: Uuid,
    pub sender: String,
    pub message_id: Uuid,
    pub body: String,
    /// Unix milliseconds.
    pub sent_at: i64,
}

pub(crate) type MessageRow = (String, String, String, String, i64);

impl Message {
    pub(crate) fn from_row((room_id, sender, message_id, body, sent_at): MessageRow) -> Result<Message, sqlx::Error> {
        Ok(Message {
            room_id: Uuid::parse_str(&room_id).map_err(decode_err)?,
            sender,
            message_id: Uuid::parse_str(&message_id).map_err(decode_err)?,
            body,
            sent_at,
        })
    }
}

pub(crate) fn decode_err<E>(err: E) -> sqlx::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    sqlx::Error::Decode(err.into())
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let db_pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    init_schema(&db_pool).await.expect("schema");
    db_pool
}
