use std::{str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub session_idle_minutes: i64,
    /// How long an issued handoff ticket stays claimable.
    pub handoff_ttl: Duration,
    /// How long an upgrade waits for its ticket before giving up.
    pub handoff_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://social.db?mode=rwc".to_owned(),
            bind_addr: "0.0.0.0:8080".to_owned(),
            db_max_connections: 16,
            session_idle_minutes: 60,
            handoff_ttl: Duration::from_secs(30),
            handoff_wait: Duration::from_millis(5000),
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        Ok(Config {
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS")?.unwrap_or(defaults.db_max_connections),
            session_idle_minutes: parse_var("SESSION_IDLE_MINUTES")?.unwrap_or(defaults.session_idle_minutes),
            handoff_ttl: parse_var("HANDOFF_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.handoff_ttl),
            handoff_wait: parse_var("HANDOFF_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.handoff_wait),
        })
    }
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(None),
    }
}
