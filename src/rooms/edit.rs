use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{error::{CoreResult, OrLog}, hub::Hub, session::CurrentUser, AppState};

use super::{directory, RoomChanges, RoomEdit, RoomSummary};

#[derive(Debug, Deserialize)]
pub(crate) struct EditRoomQuery {
    room_id: Uuid,
    action: Option<String>,
    name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    users: Option<Vec<String>>,
}

impl EditRoomQuery {
    fn into_edit(self) -> RoomEdit {
        match self.action.as_deref() {
            Some("leave") => RoomEdit::Leave,
            _ => RoomEdit::Update(RoomChanges {
                name: self.name,
                description: self.description,
                avatar: self.avatar,
                members: self.users,
            }),
        }
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn edit_room(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    CurrentUser(user): CurrentUser,
    Json(query): Json<EditRoomQuery>,
) -> CoreResult<Json<RoomSummary>> {
    let room_id = query.room_id;
    let room = directory::edit_room(&db_pool, &hub, room_id, query.into_edit(), &user).await?;
    let last = directory::last_message_at(&db_pool, room_id)
        .await
        .or_log("reading last message");
    Ok(Json(directory::summarize(room, &user, last)))
}
