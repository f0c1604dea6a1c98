use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::{
    db::{decode_err, now_millis},
    error::{CoreError, CoreResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationCounter {
    pub chat_id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub unread: i64,
    pub last_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    Follow,
    Group { group_id: String },
}

impl RequestKind {
    /// A group request must name its group; a follow request must not.
    pub fn from_parts(kind: &str, group_id: Option<&str>) -> CoreResult<RequestKind> {
        let group_id = group_id.map(str::trim).filter(|g| !g.is_empty());
        match (kind, group_id) {
            ("follow", None) => Ok(RequestKind::Follow),
            ("follow", Some(_)) => Err(CoreError::validation("Follow requests do not take a group")),
            ("group", Some(group_id)) => Ok(RequestKind::Group { group_id: group_id.to_owned() }),
            ("group", None) => Err(CoreError::validation("Group requests need a group id")),
            _ => Err(CoreError::validation(format!("Unknown request type {kind:?}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Follow => "follow",
            RequestKind::Group { .. } => "group",
        }
    }

    fn group_id(&self) -> &str {
        match self {
            RequestKind::Follow => "",
            RequestKind::Group { group_id } => group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestNotification {
    pub sender: String,
    pub receiver: String,
    #[serde(flatten)]
    pub kind: RequestKind,
}

type CounterRow = (String, String, String, i64, i64);
type RequestRow = (String, String, String, String);

fn counter_from_row((chat_id, sender, receiver, unread, last_at): CounterRow) -> Result<NotificationCounter, sqlx::Error> {
    Ok(NotificationCounter {
        chat_id: Uuid::parse_str(&chat_id).map_err(decode_err)?,
        sender,
        receiver,
        unread,
        last_at,
    })
}

fn request_from_row((sender, receiver, kind, group_id): RequestRow) -> Result<RequestNotification, sqlx::Error> {
    let kind = RequestKind::from_parts(&kind, Some(group_id.as_str())).map_err(|e| decode_err(e.to_string()))?;
    Ok(RequestNotification { sender, receiver, kind })
}

/// One more unread message from `sender` for `receiver` in `chat_id`.
pub async fn record_message(db_pool: &SqlitePool, chat_id: Uuid, sender: &str, receiver: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO chat_notifications (chat_id,sender,receiver,unread,last_at) VALUES (?,?,?,1,?)
         ON CONFLICT (chat_id,sender,receiver) DO UPDATE SET unread = unread + 1, last_at = excluded.last_at",
    )
    .bind(chat_id.to_string())
    .bind(sender)
    .bind(receiver)
    .bind(now_millis())
    .execute(db_pool)
    .await?;
    debug!("unread {chat_id}: {sender} -> {receiver}");
    Ok(())
}

/// `user` opened `chat_id`: everything addressed to them there is read.
pub async fn clear_on_open(db_pool: &SqlitePool, chat_id: Uuid, user: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE chat_notifications SET unread = 0 WHERE chat_id=? AND receiver=?")
        .bind(chat_id.to_string())
        .bind(user)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn total_unread(db_pool: &SqlitePool, user: &str) -> Result<i64, sqlx::Error> {
    let (total,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(unread), 0) FROM chat_notifications WHERE receiver=?")
        .bind(user)
        .fetch_one(db_pool)
        .await?;
    Ok(total)
}

/// Counters with something unread, newest first.
pub async fn unread_by_chat(db_pool: &SqlitePool, user: &str) -> Result<Vec<NotificationCounter>, sqlx::Error> {
    let rows: Vec<CounterRow> = sqlx::query_as(
        "SELECT chat_id,sender,receiver,unread,last_at FROM chat_notifications
         WHERE receiver=? AND unread > 0 ORDER BY last_at DESC",
    )
    .bind(user)
    .fetch_all(db_pool)
    .await?;
    rows.into_iter().map(counter_from_row).collect()
}

/// Returns false if the request was already pending.
pub async fn add_request(db_pool: &SqlitePool, request: &RequestNotification) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("INSERT OR IGNORE INTO request_notifications (sender,receiver,kind,group_id) VALUES (?,?,?,?)")
        .bind(&request.sender)
        .bind(&request.receiver)
        .bind(request.kind.as_str())
        .bind(request.kind.group_id())
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns false if there was nothing to remove.
pub async fn remove_request(db_pool: &SqlitePool, request: &RequestNotification) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM request_notifications WHERE sender=? AND receiver=? AND kind=? AND group_id=?")
        .bind(&request.sender)
        .bind(&request.receiver)
        .bind(request.kind.as_str())
        .bind(request.kind.group_id())
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn requests_for(db_pool: &SqlitePool, user: &str) -> Result<Vec<RequestNotification>, sqlx::Error> {
    let rows: Vec<RequestRow> = sqlx::query_as("SELECT sender,receiver,kind,group_id FROM request_notifications WHERE receiver=? ORDER BY rowid")
        .bind(user)
        .fetch_all(db_pool)
        .await?;
    rows.into_iter().map(request_from_row).collect()
}

pub async fn requests_by_type(
    db_pool: &SqlitePool,
    receiver: &str,
    sender: &str,
    kind: &str,
) -> Result<Vec<RequestNotification>, sqlx::Error> {
    let rows: Vec<RequestRow> = sqlx::query_as(
        "SELECT sender,receiver,kind,group_id FROM request_notifications WHERE receiver=? AND sender=? AND kind=? ORDER BY rowid",
    )
    .bind(receiver)
    .bind(sender)
    .bind(kind)
    .fetch_all(db_pool)
    .await?;
    rows.into_iter().map(request_from_row).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn messages_from_distinct_senders_add_up() {
        let db_pool = test_pool().await;
        let chat = Uuid::now_v7();
        for sender in ["alice", "bob", "carol", "dave"] {
            record_message(&db_pool, chat, sender, "erin").await.unwrap();
        }
        assert_eq!(total_unread(&db_pool, "erin").await.unwrap(), 4);
        assert_eq!(total_unread(&db_pool, "alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn opening_chat_clears_only_that_chat_for_that_receiver() {
        let db_pool = test_pool().await;
        let c1 = Uuid::now_v7();
        let c2 = Uuid::now_v7();
        for _ in 0..3 {
            record_message(&db_pool, c1, "sender", "receiver").await.unwrap();
        }
        record_message(&db_pool, c2, "sender", "receiver").await.unwrap();
        record_message(&db_pool, c1, "receiver", "sender").await.unwrap();
        assert_eq!(total_unread(&db_pool, "receiver").await.unwrap(), 4);

        assert_eq!(clear_on_open(&db_pool, c1, "receiver").await.unwrap(), 1);
        assert_eq!(total_unread(&db_pool, "receiver").await.unwrap(), 1);
        assert_eq!(total_unread(&db_pool, "sender").await.unwrap(), 1);

        let pending = unread_by_chat(&db_pool, "receiver").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].chat_id, c2);
        assert_eq!(pending[0].unread, 1);
    }

    #[tokio::test]
    async fn counter_grows_again_after_clear() {
        let db_pool = test_pool().await;
        let chat = Uuid::now_v7();
        record_message(&db_pool, chat, "a", "b").await.unwrap();
        clear_on_open(&db_pool, chat, "b").await.unwrap();
        record_message(&db_pool, chat, "a", "b").await.unwrap();
        assert_eq!(total_unread(&db_pool, "b").await.unwrap(), 1);
    }

    #[test]
    fn request_kind_requires_group_id_only_for_groups() {
        assert_eq!(RequestKind::from_parts("follow", None).unwrap(), RequestKind::Follow);
        assert_eq!(RequestKind::from_parts("follow", Some("")).unwrap(), RequestKind::Follow);
        assert!(RequestKind::from_parts("follow", Some("g1")).is_err());
        assert!(RequestKind::from_parts("group", None).is_err());
        assert_eq!(
            RequestKind::from_parts("group", Some("g1")).unwrap(),
            RequestKind::Group { group_id: "g1".into() }
        );
        assert!(RequestKind::from_parts("poke", None).is_err());
    }

    #[tokio::test]
    async fn request_notifications_are_idempotent() {
        let db_pool = test_pool().await;
        let follow = RequestNotification {
            sender: "alice".into(),
            receiver: "bob".into(),
            kind: RequestKind::Follow,
        };
        let invite = RequestNotification {
            sender: "alice".into(),
            receiver: "bob".into(),
            kind: RequestKind::Group { group_id: "g1".into() },
        };

        assert!(add_request(&db_pool, &follow).await.unwrap());
        assert!(!add_request(&db_pool, &follow).await.unwrap());
        assert!(add_request(&db_pool, &invite).await.unwrap());
        assert_eq!(requests_for(&db_pool, "bob").await.unwrap(), vec![follow.clone(), invite.clone()]);
        assert_eq!(requests_by_type(&db_pool, "bob", "alice", "group").await.unwrap(), vec![invite.clone()]);

        assert!(remove_request(&db_pool, &follow).await.unwrap());
        assert!(!remove_request(&db_pool, &follow).await.unwrap());
        assert_eq!(requests_for(&db_pool, "bob").await.unwrap(), vec![invite]);
    }

    #[test]
    fn request_serializes_flat() {
        let invite = RequestNotification {
            sender: "a".into(),
            receiver: "b".into(),
            kind: RequestKind::Group { group_id: "g".into() },
        };
        assert_eq!(
            serde_json::to_value(&invite).unwrap(),
            serde_json::json!({"sender": "a", "receiver": "b", "type": "group", "group_id": "g"})
        );
    }
}
