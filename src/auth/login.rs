use axum::{debug_handler, response::{IntoResponse, Redirect, Response}, Form, Json};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{error::Notice, session::USER_ID, AppResult};

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    username: String,
    return_url: Option<String>,
}

/// Binds an already-verified username to the session. Credential checks
/// belong to the identity provider in front of this service.
#[debug_handler]
pub(crate) async fn login(
    session: Session,
    Form(LoginQuery { username, return_url }): Form<LoginQuery>,
) -> AppResult<Response> {
    let username = username.trim();
    if username.is_empty() || username.contains(char::is_whitespace) {
        return Ok(Json(Notice::new("Please enter a valid username")).into_response());
    }

    session.cycle_id().await?;
    session.insert(USER_ID, username).await?;
    info!("welcome {username}");

    Ok(Redirect::to(super::return_to(return_url.as_deref())).into_response())
}
