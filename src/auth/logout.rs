use axum::{extract::Query, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{session::MaybeUser, AppResult};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    return_url: Option<String>,
}

/// Drops the session record and its cookie. Live room sockets are left to
/// close on their own; they were authorised at upgrade time.
pub(crate) async fn logout(
    MaybeUser(user): MaybeUser,
    session: Session,
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
) -> AppResult<Redirect> {
    session.flush().await?;
    if let Some(user) = user {
        info!("goodbye {user}");
    }
    Ok(Redirect::to(super::return_to(return_url.as_deref())))
}
