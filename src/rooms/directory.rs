use std::collections::BTreeSet;

use rand::seq::IndexedRandom;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{Room, RoomKind, RoomRow, ROOM_COLUMNS},
    error::{CoreError, CoreResult},
    hub::Hub,
};

/// Optional presentation fields supplied with a new room.
#[derive(Debug, Clone, Default)]
pub struct RoomDetails {
    pub name: String,
    pub description: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Default)]
pub struct RoomChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub enum RoomEdit {
    Leave,
    Update(RoomChanges),
}

/// A room as one member sees it in their list.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    /// Everyone but the viewer.
    pub others: Vec<String>,
    pub last_message_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomListing {
    pub group: Vec<RoomSummary>,
    pub private: Vec<RoomSummary>,
}

/// Sorted, deduplicated, blank names dropped.
pub fn canonical_members<I, S>(members: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    members
        .into_iter()
        .map(|m| m.as_ref().trim().to_owned())
        .filter(|m| !m.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn summarize(room: Room, viewer: &str, last_message_at: Option<i64>) -> RoomSummary {
    let others = room.members.iter().filter(|m| *m != viewer).cloned().collect();
    RoomSummary { room, others, last_message_at }
}

pub async fn create_room(
    db_pool: &SqlitePool,
    kind: RoomKind,
    members: Vec<String>,
    creator: &str,
    details: RoomDetails,
) -> CoreResult<Room> {
    let invited = canonical_members(&members);
    if invited.iter().all(|m| m == creator) {
        return Err(CoreError::validation("Please select users to chat to"));
    }

    let members = canonical_members(invited.iter().map(String::as_str).chain([creator]));

    let room = match kind {
        RoomKind::Private => {
            if private_room_exists(db_pool, &members).await? {
                return Err(CoreError::Duplicate("Private chat already exists".to_owned()));
            }
            Room {
                id: Uuid::now_v7(),
                name: String::new(),
                description: String::new(),
                kind,
                members,
                admin: None,
                avatar: String::new(),
            }
        }
        RoomKind::Group => Room {
            id: Uuid::now_v7(),
            name: details.name,
            description: details.description,
            kind,
            members,
            admin: Some(creator.to_owned()),
            avatar: details.avatar,
        },
    };

    sqlx::query("INSERT INTO rooms (id,name,description,kind,members,admin,avatar) VALUES (?,?,?,?,?,?,?)")
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(&room.description)
        .bind(room.kind.as_str())
        .bind(room.members_json())
        .bind(room.admin.as_deref())
        .bind(&room.avatar)
        .execute(db_pool)
        .await?;

    info!("{creator} created {} room {} with {:?}", room.kind.as_str(), room.id, room.members);
    Ok(room)
}

async fn private_room_exists(db_pool: &SqlitePool, members: &[String]) -> Result<bool, sqlx::Error> {
    let rows: Vec<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE kind=?"))
        .bind(RoomKind::Private.as_str())
        .fetch_all(db_pool)
        .await?;

    for row in rows {
        let room = Room::from_row(row)?;
        if canonical_members(&room.members) == members {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn get_room(db_pool: &SqlitePool, room_id: Uuid) -> CoreResult<Room> {
    let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
        .bind(room_id.to_string())
        .fetch_optional(db_pool)
        .await?;

    match row {
        Some(row) => Ok(Room::from_row(row)?),
        None => Err(CoreError::not_found("Chat not found")),
    }
}

pub async fn last_message_at(db_pool: &SqlitePool, room_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
    let (last,): (Option<i64>,) = sqlx::query_as("SELECT MAX(sent_at) FROM messages WHERE room_id=?")
        .bind(room_id.to_string())
        .fetch_one(db_pool)
        .await?;
    Ok(last)
}

/// Every room `user` belongs to, split by kind. Each list is ordered by name,
/// then by most recent message first; rooms without messages keep their name
/// order at the end.
pub async fn list_rooms_for_user(db_pool: &SqlitePool, user: &str) -> CoreResult<RoomListing> {
    let rows: Vec<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms"))
        .fetch_all(db_pool)
        .await?;

    let mut listing = RoomListing::default();
    for row in rows {
        let room = Room::from_row(row)?;
        if !room.is_member(user) {
            continue;
        }
        let last = last_message_at(db_pool, room.id).await?;
        let summary = summarize(room, user, last);
        match summary.room.kind {
            RoomKind::Group => listing.group.push(summary),
            RoomKind::Private => listing.private.push(summary),
        }
    }

    for rooms in [&mut listing.group, &mut listing.private] {
        rooms.sort_by(|a, b| a.room.name.cmp(&b.room.name));
        rooms.sort_by(|a, b| b.last_message_at.unwrap_or(0).cmp(&a.last_message_at.unwrap_or(0)));
    }
    Ok(listing)
}

/// Applies `edit` on behalf of `acting`, then closes the live connection of
/// every member the edit removed.
pub async fn edit_room(
    db_pool: &SqlitePool,
    hub: &Hub,
    room_id: Uuid,
    edit: RoomEdit,
    acting: &str,
) -> CoreResult<Room> {
    let before = get_room(db_pool, room_id).await?;
    let mut room = before.clone();

    match edit {
        RoomEdit::Leave => {
            if !before.is_member(acting) {
                return Err(CoreError::authorization("You are not a member of this chat"));
            }
            room.members.retain(|m| m != acting);
            if room.admin.as_deref() == Some(acting) {
                room.admin = room.members.choose(&mut rand::rng()).cloned();
            }
        }
        RoomEdit::Update(changes) => {
            if before.admin.as_deref() != Some(acting) {
                return Err(CoreError::authorization("Only the chat admin can edit this chat"));
            }
            if let Some(name) = changes.name {
                room.name = name;
            }
            if let Some(description) = changes.description {
                room.description = description;
            }
            if let Some(avatar) = changes.avatar {
                room.avatar = avatar;
            }
            let members = changes.members.unwrap_or_else(|| before.members.clone());
            room.members = canonical_members(members.iter().map(String::as_str).chain([acting]));
        }
    }

    sqlx::query("UPDATE rooms SET name=?, description=?, members=?, admin=?, avatar=? WHERE id=?")
        .bind(&room.name)
        .bind(&room.description)
        .bind(room.members_json())
        .bind(room.admin.as_deref())
        .bind(&room.avatar)
        .bind(room.id.to_string())
        .execute(db_pool)
        .await?;

    for removed in before.members.iter().filter(|m| !room.is_member(m)) {
        hub.disconnect(room.id, removed);
        info!("{removed} removed from {} by {acting}", room.id);
    }

    Ok(room)
}
