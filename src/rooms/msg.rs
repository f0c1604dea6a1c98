use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::{
    db::{now_millis, Message, MessageRow, Room},
    error::{CoreError, CoreResult},
    hub::{Event, Hub},
    notifications::aggregator,
};

/// Frame a client sends over its room socket.
#[derive(Debug, Deserialize)]
pub(crate) struct IncomingMessage {
    pub(crate) body: String,
}

/// Stores a message, fans it out to the room, and bumps the unread counter
/// of every other member. Members live in another room are also told their
/// new total.
pub async fn append_message(
    db_pool: &SqlitePool,
    hub: &Hub,
    room: &Room,
    sender: &str,
    body: &str,
) -> CoreResult<Message> {
    let body = body.trim();
    if body.is_empty() {
        return Err(CoreError::validation("Please add content"));
    }
    if !room.is_member(sender) {
        return Err(CoreError::authorization("You are not a member of this chat"));
    }

    let message = Message {
        room_id: room.id,
        sender: sender.to_owned(),
        message_id: Uuid::now_v7(),
        body: body.to_owned(),
        sent_at: now_millis(),
    };

    sqlx::query("INSERT INTO messages (room_id,sender,message_id,body,sent_at) VALUES (?,?,?,?,?)")
        .bind(message.room_id.to_string())
        .bind(&message.sender)
        .bind(message.message_id.to_string())
        .bind(&message.body)
        .bind(message.sent_at)
        .execute(db_pool)
        .await?;

    hub.publish(room.id, &Event::Message(message.clone()));

    for receiver in room.members.iter().filter(|m| *m != sender) {
        if let Err(err) = aggregator::record_message(db_pool, room.id, sender, receiver).await {
            warn!("recording unread for {receiver} in {} failed: {err}", room.id);
            continue;
        }
        // the room socket already carried the message itself
        if hub.is_live_in(room.id, receiver) {
            continue;
        }
        match aggregator::total_unread(db_pool, receiver).await {
            Ok(total_unread) => {
                hub.notify_member(receiver, &Event::Unread {
                    chat_id: room.id,
                    sender: sender.to_owned(),
                    total_unread,
                });
            }
            Err(err) => warn!("counting unread for {receiver} failed: {err}"),
        }
    }

    Ok(message)
}

pub async fn history(db_pool: &SqlitePool, room_id: Uuid) -> Result<Vec<Message>, sqlx::Error> {
    let rows: Vec<MessageRow> = sqlx::query_as("SELECT room_id,sender,message_id,body,sent_at FROM messages WHERE room_id=? ORDER BY seq")
        .bind(room_id.to_string())
        .fetch_all(db_pool)
        .await?;
    rows.into_iter().map(Message::from_row).collect()
}
