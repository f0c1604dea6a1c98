pub mod aggregator;

pub use aggregator::{NotificationCounter, RequestKind, RequestNotification};

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    error::{CoreError, CoreResult, OrLog},
    session::CurrentUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/requests", axum::routing::post(add_request).delete(remove_request))
}

#[derive(Debug, Serialize)]
pub(crate) struct Overview {
    total_unread: i64,
    chats: Vec<NotificationCounter>,
    requests: Vec<RequestNotification>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn overview(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
) -> Json<Overview> {
    Json(Overview {
        total_unread: aggregator::total_unread(&db_pool, &user).await.or_log("counting unread"),
        chats: aggregator::unread_by_chat(&db_pool, &user).await.or_log("listing unread chats"),
        requests: aggregator::requests_for(&db_pool, &user).await.or_log("listing requests"),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct RequestQuery {
    /// Defaults to the signed-in user.
    sender: Option<String>,
    receiver: String,
    #[serde(rename = "type")]
    kind: String,
    group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Changed {
    changed: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn add_request(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(RequestQuery { receiver, kind, group_id, .. }): Json<RequestQuery>,
) -> CoreResult<Json<Changed>> {
    if receiver.trim().is_empty() || receiver == user {
        return Err(CoreError::validation("Please choose someone to send the request to"));
    }
    let request = RequestNotification {
        sender: user,
        receiver,
        kind: RequestKind::from_parts(&kind, group_id.as_deref())?,
    };
    let changed = aggregator::add_request(&db_pool, &request).await?;
    if changed {
        info!("{} sent a {} request to {}", request.sender, request.kind.as_str(), request.receiver);
    }
    Ok(Json(Changed { changed }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove_request(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(RequestQuery { sender, receiver, kind, group_id }): Json<RequestQuery>,
) -> CoreResult<Json<Changed>> {
    let sender = sender.unwrap_or_else(|| user.clone());
    if user != sender && user != receiver {
        return Err(CoreError::authorization("You can only withdraw or answer your own requests"));
    }
    let request = RequestNotification {
        sender,
        receiver,
        kind: RequestKind::from_parts(&kind, group_id.as_deref())?,
    };
    let changed = aggregator::remove_request(&db_pool, &request).await?;
    Ok(Json(Changed { changed }))
}
