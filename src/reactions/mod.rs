mod toggle;

pub use toggle::{current, tally, toggle, Reaction, ReactionAction, Subject, SubjectKind, Tally};

use axum::{debug_handler, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{error::CoreResult, session::CurrentUser, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct ReactQuery {
    subject: SubjectKind,
    subject_id: String,
    action: ReactionAction,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReactReply {
    state: Reaction,
    #[serde(flatten)]
    tally: Tally,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(react))
}

#[debug_handler(state = AppState)]
pub(crate) async fn react(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(ReactQuery { subject, subject_id, action }): Json<ReactQuery>,
) -> CoreResult<Json<ReactReply>> {
    let subject = Subject { kind: subject, id: subject_id };
    let state = toggle(&db_pool, &subject, &user, action).await?;
    let tally = tally(&db_pool, &subject).await?;
    Ok(Json(ReactReply { state, tally }))
}
