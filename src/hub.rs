//! In-memory registry of live room connections.
//!
//! Membership lives in the store; the hub only tracks which member is
//! currently connected where. It is rebuilt from scratch on restart as
//! clients reopen their rooms.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Message;

pub const OUTBOX_CAPACITY: usize = 64;

pub type ConnId = Uuid;

/// Payloads written to live connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(Message),
    Unread {
        chat_id: Uuid,
        sender: String,
        total_unread: i64,
    },
    Closed {
        room_id: Uuid,
        reason: String,
    },
}

/// Hub-side handle of one live connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    outbox: mpsc::Sender<Arc<str>>,
    close: watch::Sender<bool>,
}

/// Transport-side half of a [`Connection`].
#[derive(Debug)]
pub struct Inbox {
    id: ConnId,
    outbox: mpsc::Receiver<Arc<str>>,
    close: watch::Receiver<bool>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Event(Arc<str>),
    /// The hub asked for the connection to be closed.
    Close,
    /// The hub dropped this connection in favour of a newer one.
    Superseded,
}

impl Connection {
    pub fn open(capacity: usize) -> (Connection, Inbox) {
        let id = Uuid::new_v4();
        let (outbox_tx, outbox_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(false);
        (
            Connection { id, outbox: outbox_tx, close: close_tx },
            Inbox { id, outbox: outbox_rx, close: close_rx },
        )
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    fn try_write(&self, payload: Arc<str>) -> bool {
        self.outbox.try_send(payload).is_ok()
    }

    fn shut(&self) {
        self.close.send_replace(true);
    }
}

impl Inbox {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub async fn next(&mut self) -> Delivery {
        let Inbox { outbox, close, .. } = self;
        tokio::select! {
            biased;
            closed = async { close.wait_for(|closed| *closed).await.is_ok() } => {
                if closed { Delivery::Close } else { Delivery::Superseded }
            }
            payload = outbox.recv() => match payload {
                Some(payload) => Delivery::Event(payload),
                None => Delivery::Superseded,
            },
        }
    }

    /// Events already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Arc<str>> {
        let mut pending = Vec::new();
        while let Ok(payload) = self.outbox.try_recv() {
            pending.push(payload);
        }
        pending
    }

    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }
}

struct Entry {
    member: String,
    conn: Connection,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<Uuid, Vec<Entry>>,
    /// member -> (room, connection) of its one live subscription
    live: HashMap<String, (Uuid, ConnId)>,
}

impl Registry {
    fn take(&mut self, room_id: Uuid, conn_id: ConnId) -> Option<Entry> {
        let entries = self.rooms.get_mut(&room_id)?;
        let index = entries.iter().position(|e| e.conn.id == conn_id)?;
        let entry = entries.swap_remove(index);
        if entries.is_empty() {
            self.rooms.remove(&room_id);
        }
        if self.live.get(&entry.member) == Some(&(room_id, conn_id)) {
            self.live.remove(&entry.member);
        }
        Some(entry)
    }
}

/// Shared handle; clones see the same registry.
#[derive(Clone, Default)]
pub struct Hub {
    registry: Arc<Mutex<Registry>>,
}

impl Hub {
    pub fn new() -> Hub {
        Hub::default()
    }

    /// Registers `conn` as `member`'s live subscription in `room_id`.
    /// Any earlier subscription of the member, in any room, is dropped from
    /// the registry without being closed.
    pub fn subscribe(&self, room_id: Uuid, member: &str, conn: Connection) {
        let conn_id = conn.id;
        let mut registry = self.registry.lock();
        if let Some((old_room, old_conn)) = registry.live.remove(member) {
            if registry.take(old_room, old_conn).is_some() {
                debug!("{member}: subscription {old_conn} in {old_room} superseded");
            }
        }
        registry.live.insert(member.to_owned(), (room_id, conn_id));
        registry.rooms.entry(room_id).or_default().push(Entry {
            member: member.to_owned(),
            conn,
        });
        info!("{member} subscribed to {room_id} ({conn_id})");
    }

    /// Best-effort fan-out to everyone live in `room_id`. Connections that
    /// cannot take the write are unsubscribed. Returns how many accepted it.
    pub fn publish(&self, room_id: Uuid, event: &Event) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };

        // writes never block, so they happen under the lock; a concurrent
        // disconnect then always lands after or before the whole fan-out
        let mut registry = self.registry.lock();
        let Some(entries) = registry.rooms.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in entries {
            if entry.conn.try_write(payload.clone()) {
                delivered += 1;
            } else {
                failed.push(entry.conn.id);
            }
        }

        for conn_id in failed {
            if let Some(entry) = registry.take(room_id, conn_id) {
                warn!("dropping {} ({conn_id}) from {room_id}: write failed", entry.member);
            }
        }
        delivered
    }

    /// Writes `event` to `member`'s live connection, wherever it is.
    pub fn notify_member(&self, member: &str, event: &Event) -> bool {
        let Some(payload) = encode(event) else {
            return false;
        };

        let mut registry = self.registry.lock();
        let Some(&(room_id, conn_id)) = registry.live.get(member) else {
            return false;
        };
        let written = registry
            .rooms
            .get(&room_id)
            .and_then(|entries| entries.iter().find(|e| e.conn.id == conn_id))
            .map(|e| e.conn.try_write(payload));

        match written {
            Some(true) => true,
            Some(false) => {
                registry.take(room_id, conn_id);
                warn!("dropping {member} ({conn_id}) from {room_id}: write failed");
                false
            }
            None => false,
        }
    }

    /// Closes and forgets `member`'s connection in `room_id`. Returns false
    /// if there was nothing to close. The `closed` event is the last payload
    /// the connection ever receives.
    pub fn disconnect(&self, room_id: Uuid, member: &str) -> bool {
        let closed = encode(&Event::Closed {
            room_id,
            reason: "removed from room".to_owned(),
        });

        let mut registry = self.registry.lock();
        let conn_id = registry
            .rooms
            .get(&room_id)
            .and_then(|entries| entries.iter().find(|e| e.member == member))
            .map(|e| e.conn.id);
        let Some(entry) = conn_id.and_then(|conn_id| registry.take(room_id, conn_id)) else {
            return false;
        };

        if let Some(payload) = closed {
            entry.conn.try_write(payload);
        }
        entry.conn.shut();
        drop(registry);

        info!("disconnected {member} from {room_id}");
        true
    }

    /// Forgets a connection the transport reported as gone.
    pub fn unsubscribe(&self, conn_id: ConnId) -> bool {
        let mut registry = self.registry.lock();
        let room_id = registry
            .rooms
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| e.conn.id == conn_id))
            .map(|(room_id, _)| *room_id);
        match room_id.and_then(|room_id| registry.take(room_id, conn_id)) {
            Some(entry) => {
                debug!("{} unsubscribed ({conn_id})", entry.member);
                true
            }
            None => false,
        }
    }

    pub fn is_live_in(&self, room_id: Uuid, member: &str) -> bool {
        self.registry
            .lock()
            .live
            .get(member)
            .is_some_and(|(live_room, _)| *live_room == room_id)
    }

    pub fn live_members(&self, room_id: Uuid) -> Vec<String> {
        self.registry
            .lock()
            .rooms
            .get(&room_id)
            .map(|entries| entries.iter().map(|e| e.member.clone()).collect())
            .unwrap_or_default()
    }
}

fn encode(event: &Event) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(err) => {
            warn!("failed to serialize event: {err}");
            None
        }
    }
}
