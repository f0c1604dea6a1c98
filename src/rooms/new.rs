use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    db::RoomKind,
    error::{CoreError, CoreResult},
    session::CurrentUser,
    AppState,
};

use super::{directory, RoomDetails, RoomSummary};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    avatar: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(NewRoomQuery { kind, users, name, description, avatar }): Json<NewRoomQuery>,
) -> CoreResult<Json<RoomSummary>> {
    let Some(kind) = kind.as_deref().and_then(RoomKind::parse) else {
        return Err(CoreError::validation("Please select type of chat created"));
    };

    let room = directory::create_room(
        &db_pool,
        kind,
        users,
        &user,
        RoomDetails { name, description, avatar },
    )
    .await?;

    Ok(Json(directory::summarize(room, &user, None)))
}
