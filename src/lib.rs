pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handoff;
pub mod hub;
pub mod notifications;
pub mod reactions;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use handoff::HandoffBridge;
pub use hub::Hub;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: Hub,
    pub bridge: HandoffBridge,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> AppState {
        AppState {
            db_pool,
            hub: Hub::new(),
            bridge: HandoffBridge::new(config.handoff_ttl),
            config: Arc::new(config),
        }
    }
}

/// Every route of the service, before session and CORS layers.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .nest("/chat", rooms::router())
        .nest("/notifications", notifications::router())
        .nest("/reactions", reactions::router())
        .with_state(app_state)
}
