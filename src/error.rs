use axum::{response::{IntoResponse, Response}, Json};
use serde::Serialize;

/// Failures of the chat and notification core.
///
/// Everything except `Store` is informational: the request still completes and
/// the caller sees a `message` field explaining what happened.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Duplicate(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

/// Body of an informational reply: `{"message": "..."}`.
#[derive(Debug, Serialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Notice { message: message.into() }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        if let CoreError::Store(err) = &self {
            tracing::error!("store failure surfaced to client: {err}");
            return Json(Notice::new("Please try again later")).into_response();
        }
        Json(Notice::new(self.to_string())).into_response()
    }
}

/// Swallows store failures on read paths: the error is logged and the
/// zero value takes its place.
pub trait OrLog<T> {
    fn or_log(self, operation: &str) -> T;
}

impl<T: Default, E: std::fmt::Display> OrLog<T> for Result<T, E> {
    fn or_log(self, operation: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{operation} failed: {err}");
                T::default()
            }
        }
    }
}
