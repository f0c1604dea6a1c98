//! Hands (room, user) from the open-room request to the websocket upgrade
//! that follows it, keyed by a single-use token so concurrent opens can't
//! cross wires.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, time::Instant};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Uuid);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Token {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub room_id: Uuid,
    pub user: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("handoff ticket expired")]
    Expired,
    #[error("no handoff ticket arrived in time")]
    TimedOut,
}

struct Pending {
    ticket: Ticket,
    issued_at: Instant,
}

struct Inner {
    tickets: Mutex<HashMap<Token, Pending>>,
    issued: Notify,
    ttl: Duration,
}

#[derive(Clone)]
pub struct HandoffBridge {
    inner: Arc<Inner>,
}

impl HandoffBridge {
    pub fn new(ttl: Duration) -> HandoffBridge {
        HandoffBridge {
            inner: Arc::new(Inner {
                tickets: Mutex::new(HashMap::new()),
                issued: Notify::new(),
                ttl,
            }),
        }
    }

    pub fn issue(&self, room_id: Uuid, user: &str) -> Token {
        let token = Token(Uuid::new_v4());
        self.insert(token, Ticket { room_id, user: user.to_owned() });
        token
    }

    fn insert(&self, token: Token, ticket: Ticket) {
        let now = Instant::now();
        let ttl = self.inner.ttl;
        let mut tickets = self.inner.tickets.lock();
        tickets.retain(|_, p| now.duration_since(p.issued_at) < ttl);
        tickets.insert(token, Pending { ticket, issued_at: now });
        drop(tickets);
        self.inner.issued.notify_waiters();
    }

    /// Takes the ticket for `token`, waiting up to `wait` for it to be issued.
    /// A ticket can be claimed once.
    pub async fn claim(&self, token: Token, wait: Duration) -> Result<Ticket, HandoffError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.inner.issued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(ticket) = self.take(token)? {
                debug!("handoff {token} claimed by {}", ticket.user);
                return Ok(ticket);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(HandoffError::TimedOut);
            }
        }
    }

    fn take(&self, token: Token) -> Result<Option<Ticket>, HandoffError> {
        let Some(pending) = self.inner.tickets.lock().remove(&token) else {
            return Ok(None);
        };
        if pending.issued_at.elapsed() >= self.inner.ttl {
            return Err(HandoffError::Expired);
        }
        Ok(Some(pending.ticket))
    }

    pub fn pending(&self) -> usize {
        self.inner.tickets.lock().len()
    }
}
