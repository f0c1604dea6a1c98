use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::Message,
    error::{CoreError, CoreResult, OrLog},
    handoff::{HandoffBridge, Token},
    notifications::aggregator,
    session::CurrentUser,
    AppState,
};

use super::{directory, msg, RoomListing, RoomSummary};

#[derive(Debug, Deserialize)]
pub(crate) struct OpenRoomQuery {
    room_id: Uuid,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenedRoom {
    user: String,
    room: RoomSummary,
    previous_messages: Vec<Message>,
    /// Present this as `?token=` when upgrading to the room socket.
    token: Token,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
) -> Json<RoomListing> {
    Json(
        directory::list_rooms_for_user(&db_pool, &user)
            .await
            .or_log("listing rooms")
    )
}

#[debug_handler(state = AppState)]
pub(crate) async fn open_room(
    State(db_pool): State<SqlitePool>,
    State(bridge): State<HandoffBridge>,
    CurrentUser(user): CurrentUser,
    Json(OpenRoomQuery { room_id }): Json<OpenRoomQuery>,
) -> CoreResult<Json<OpenedRoom>> {
    let room = directory::get_room(&db_pool, room_id).await?;
    if !room.is_member(&user) {
        return Err(CoreError::authorization("You are not a member of this chat"));
    }

    let previous_messages = msg::history(&db_pool, room.id)
        .await
        .or_log("loading chat history");
    let last = previous_messages.last().map(|m| m.sent_at);

    match aggregator::clear_on_open(&db_pool, room.id, &user).await {
        Ok(cleared) if cleared > 0 => info!("{user} read {cleared} counters in {}", room.id),
        Ok(_) => {}
        Err(err) => tracing::warn!("clearing unread for {user} in {} failed: {err}", room.id),
    }

    let token = bridge.issue(room.id, &user);
    Ok(Json(OpenedRoom {
        room: directory::summarize(room, &user, last),
        user,
        previous_messages,
        token,
    }))
}
