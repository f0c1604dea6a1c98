use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{Message as WsMessage, WebSocket}, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::CoreError,
    handoff::{HandoffBridge, Ticket, Token},
    hub::{Connection, Delivery, OUTBOX_CAPACITY},
    session::MaybeUser,
    AppState,
};

use super::{directory, msg};

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Token,
}

#[derive(Debug, PartialEq, Eq)]
enum Ended {
    Closed,
    Superseded,
    WriteFailed,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(state): State<AppState>,
    State(bridge): State<HandoffBridge>,
    State(config): State<Arc<Config>>,
    MaybeUser(session_user): MaybeUser,
    Query(WsQuery { token }): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ticket = match bridge.claim(token, config.handoff_wait).await {
        Ok(ticket) => ticket,
        Err(err) => {
            warn!("refusing room socket: {err}");
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };

    if let Some(session_user) = session_user {
        if session_user != ticket.user {
            warn!("{session_user} presented a ticket issued to {}", ticket.user);
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    // membership may have changed since the room was opened
    match directory::get_room(&state.db_pool, ticket.room_id).await {
        Ok(room) if room.is_member(&ticket.user) => {}
        Ok(_) => {
            info!("{} is no longer in {}, refusing socket", ticket.user, ticket.room_id);
            return StatusCode::FORBIDDEN.into_response();
        }
        Err(CoreError::NotFound(_)) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!("loading {} for upgrade failed: {err}", ticket.room_id);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| serve_socket(state, ticket, socket))
}

/// Subscribes `conn` and then re-reads the membership, so an edit that ran
/// between the upgrade check and the subscription still closes it.
/// Returns false if the connection was closed again.
async fn join_room(state: &AppState, room_id: Uuid, user: &str, conn: Connection) -> bool {
    state.hub.subscribe(room_id, user, conn);

    let still_member = match directory::get_room(&state.db_pool, room_id).await {
        Ok(room) => room.is_member(user),
        Err(err) => {
            warn!("{user}: re-checking {room_id} failed: {err}");
            false
        }
    };
    if !still_member {
        state.hub.disconnect(room_id, user);
    }
    still_member
}

async fn serve_socket(state: AppState, Ticket { room_id, user }: Ticket, mut socket: WebSocket) {
    let (conn, mut inbox) = Connection::open(OUTBOX_CAPACITY);
    let conn_id = conn.id();
    if !join_room(&state, room_id, &user, conn).await {
        for payload in inbox.drain() {
            let _ = socket.send(WsMessage::text(&*payload)).await;
        }
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }

    let (mut sender, receiver) = socket.split();

    let mut forward_task = tokio::spawn(async move {
        loop {
            match inbox.next().await {
                Delivery::Event(payload) => {
                    if sender.send(WsMessage::text(&*payload)).await.is_err() {
                        return Ended::WriteFailed;
                    }
                }
                Delivery::Close => {
                    for payload in inbox.drain() {
                        let _ = sender.send(WsMessage::text(&*payload)).await;
                    }
                    let _ = sender.send(WsMessage::Close(None)).await;
                    return Ended::Closed;
                }
                Delivery::Superseded => return Ended::Superseded,
            }
        }
    });

    let read_loop = read_messages(&state, room_id, &user, receiver);
    tokio::pin!(read_loop);

    tokio::select! {
        _ = &mut read_loop => forward_task.abort(),
        ended = &mut forward_task => {
            // a superseded socket stays readable until the client goes away
            if matches!(ended, Ok(Ended::Superseded)) {
                debug!("{user}: socket for {room_id} superseded");
                read_loop.await;
            }
        }
    }

    state.hub.unsubscribe(conn_id);
    info!("{user} left the socket for {room_id}");
}

async fn read_messages(state: &AppState, room_id: Uuid, user: &str, mut receiver: SplitStream<WebSocket>) {
    while let Some(Ok(frame)) = receiver.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let Ok(incoming) = serde_json::from_str::<msg::IncomingMessage>(text.as_str()) else {
            debug!("{user}: ignoring malformed frame");
            continue;
        };

        let room = match directory::get_room(&state.db_pool, room_id).await {
            Ok(room) => room,
            Err(err) => {
                warn!("{user}: loading {room_id} failed: {err}");
                continue;
            }
        };
        if !room.is_member(user) {
            break;
        }

        if let Err(err) = msg::append_message(&state.db_pool, &state.hub, &room, user, &incoming.body).await {
            warn!("{user}: message to {room_id} dropped: {err}");
        }
    }
}
