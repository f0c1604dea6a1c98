pub mod directory;
pub mod msg;
mod edit;
mod new;
mod room;
mod ws;

pub use directory::{
    canonical_members, create_room, edit_room, get_room, list_rooms_for_user, RoomChanges,
    RoomDetails, RoomEdit, RoomListing, RoomSummary,
};
pub use msg::{append_message, history};

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::list_rooms).post(room::open_room))
        .route("/new", post(new::new_room))
        .route("/edit", post(edit::edit_room))
        .route("/ws", get(ws::room_ws))
}
