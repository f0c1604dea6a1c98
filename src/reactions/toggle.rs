use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::decode_err;

/// A user's reaction to one subject. `None` is stored explicitly rather
/// than implied by a missing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    #[default]
    None,
    #[serde(rename = "like")]
    Liked,
    #[serde(rename = "dislike")]
    Disliked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Like,
    Dislike,
}

impl From<ReactionAction> for Reaction {
    fn from(action: ReactionAction) -> Self {
        match action {
            ReactionAction::Like => Reaction::Liked,
            ReactionAction::Dislike => Reaction::Disliked,
        }
    }
}

impl Reaction {
    /// Repeating the current reaction clears it; anything else switches to it.
    pub fn apply(self, action: ReactionAction) -> Reaction {
        let requested = Reaction::from(action);
        if self == requested { Reaction::None } else { requested }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::None => "none",
            Reaction::Liked => "like",
            Reaction::Disliked => "dislike",
        }
    }

    fn parse(raw: &str) -> Option<Reaction> {
        match raw {
            "none" => Some(Reaction::None),
            "like" => Some(Reaction::Liked),
            "dislike" => Some(Reaction::Disliked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Post,
    Comment,
    GroupPost,
}

impl SubjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Post => "post",
            SubjectKind::Comment => "comment",
            SubjectKind::GroupPost => "group_post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub likes: i64,
    pub dislikes: i64,
}

pub async fn current(db_pool: &SqlitePool, subject: &Subject, user: &str) -> Result<Reaction, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT state FROM reactions WHERE subject_kind=? AND subject_id=? AND username=?")
        .bind(subject.kind.as_str())
        .bind(&subject.id)
        .bind(user)
        .fetch_optional(db_pool)
        .await?;
    match row {
        Some((state,)) => Reaction::parse(&state).ok_or_else(|| decode_err(format!("unknown reaction {state:?}"))),
        None => Ok(Reaction::None),
    }
}

/// Applies `action` to `user`'s reaction on `subject` and returns the new state.
pub async fn toggle(db_pool: &SqlitePool, subject: &Subject, user: &str, action: ReactionAction) -> Result<Reaction, sqlx::Error> {
    let mut tx = db_pool.begin().await?;

    let row: Option<(String,)> = sqlx::query_as("SELECT state FROM reactions WHERE subject_kind=? AND subject_id=? AND username=?")
        .bind(subject.kind.as_str())
        .bind(&subject.id)
        .bind(user)
        .fetch_optional(&mut *tx)
        .await?;
    let before = match row {
        Some((state,)) => Reaction::parse(&state).ok_or_else(|| decode_err(format!("unknown reaction {state:?}")))?,
        None => Reaction::None,
    };
    let after = before.apply(action);

    sqlx::query(
        "INSERT INTO reactions (subject_kind,subject_id,username,state) VALUES (?,?,?,?)
         ON CONFLICT (subject_kind,subject_id,username) DO UPDATE SET state = excluded.state",
    )
    .bind(subject.kind.as_str())
    .bind(&subject.id)
    .bind(user)
    .bind(after.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(after)
}

pub async fn tally(db_pool: &SqlitePool, subject: &Subject) -> Result<Tally, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state, COUNT(*) FROM reactions WHERE subject_kind=? AND subject_id=? GROUP BY state",
    )
    .bind(subject.kind.as_str())
    .bind(&subject.id)
    .fetch_all(db_pool)
    .await?;

    let mut tally = Tally::default();
    for (state, count) in rows {
        match Reaction::parse(&state) {
            Some(Reaction::Liked) => tally.likes = count,
            Some(Reaction::Disliked) => tally.dislikes = count,
            _ => {}
        }
    }
    Ok(tally)
}
