use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use murmur::{
    db::{self, RoomKind, Room},
    rooms::{self, RoomChanges, RoomDetails, RoomEdit},
    AppState, Config,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::{self, Message as WsFrame}};
use tower_sessions::{MemoryStore, SessionManagerLayer};
use uuid::Uuid;

const PATIENCE: Duration = Duration::from_secs(2);

async fn serve() -> (AppState, String) {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&db_pool).await.unwrap();

    let config = Config { handoff_wait: Duration::from_millis(200), ..Config::default() };
    let state = AppState::new(db_pool, config);
    let app = murmur::router(state.clone())
        .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (state, addr)
}

async fn signed_in(addr: &str, username: &str) -> reqwest::Client {
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let res = client
        .post(format!("http://{addr}/login"))
        .form(&[("username", username), ("return_url", "/chat")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/chat");
    client
}

async fn open_room(client: &reqwest::Client, addr: &str, room_id: Uuid) -> Value {
    client
        .post(format!("http://{addr}/chat"))
        .json(&json!({ "room_id": room_id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn group(state: &AppState, invited: &[&str]) -> Room {
    let details = RoomDetails { name: "book club".into(), ..Default::default() };
    let invited = invited.iter().map(|n| n.to_string()).collect();
    rooms::create_room(&state.db_pool, RoomKind::Group, invited, "alice", details)
        .await
        .unwrap()
}

async fn until_live(state: &AppState, room_id: Uuid, user: &str) {
    timeout(PATIENCE, async {
        while !state.hub.is_live_in(room_id, user) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription to show up");
}

#[tokio::test]
async fn opened_room_socket_carries_messages_both_ways() {
    let (state, addr) = serve().await;
    let room = group(&state, &["bob"]).await;

    let bob = signed_in(&addr, "bob").await;
    let opened = open_room(&bob, &addr, room.id).await;
    assert_eq!(opened["user"], "bob");
    assert_eq!(opened["room"]["others"], json!(["alice"]));
    let token = opened["token"].as_str().unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/chat/ws?token={token}")).await.unwrap();
    until_live(&state, room.id, "bob").await;

    rooms::append_message(&state.db_pool, &state.hub, &room, "alice", "hello bob").await.unwrap();
    let frame = timeout(PATIENCE, socket.next()).await.unwrap().unwrap().unwrap();
    let WsFrame::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let event: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["type"], "message");
    assert_eq!(event["body"], "hello bob");

    socket
        .send(WsFrame::Text(json!({ "body": "hi alice" }).to_string()))
        .await
        .unwrap();
    timeout(PATIENCE, async {
        while rooms::history(&state.db_pool, room.id).await.unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bob's message to be stored");
    let bodies: Vec<_> = rooms::history(&state.db_pool, room.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.sender, m.body))
        .collect();
    assert_eq!(
        bodies,
        [("alice".to_owned(), "hello bob".to_owned()), ("bob".to_owned(), "hi alice".to_owned())]
    );
}

#[tokio::test]
async fn member_removed_between_open_and_upgrade_is_refused() {
    let (state, addr) = serve().await;
    let room = group(&state, &["bob", "carol"]).await;

    let carol = signed_in(&addr, "carol").await;
    let opened = open_room(&carol, &addr, room.id).await;
    let token = opened["token"].as_str().unwrap().to_owned();

    let changes = RoomChanges { members: Some(vec!["bob".to_owned()]), ..Default::default() };
    let room = rooms::edit_room(&state.db_pool, &state.hub, room.id, RoomEdit::Update(changes), "alice")
        .await
        .unwrap();

    match connect_async(format!("ws://{addr}/chat/ws?token={token}")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        Err(err) => panic!("unexpected upgrade failure: {err}"),
        Ok(_) => panic!("upgrade should be refused"),
    }

    assert!(!state.hub.is_live_in(room.id, "carol"));
    rooms::append_message(&state.db_pool, &state.hub, &room, "alice", "carol is gone").await.unwrap();
    assert!(state.hub.live_members(room.id).is_empty());
}

#[tokio::test]
async fn strangers_and_bad_tokens_get_no_socket() {
    let (state, addr) = serve().await;
    let room = group(&state, &["bob"]).await;

    let mallory = signed_in(&addr, "mallory").await;
    let opened = open_room(&mallory, &addr, room.id).await;
    assert_eq!(opened["message"], "You are not a member of this chat");
    assert!(opened.get("token").is_none());

    let unknown = Uuid::new_v4();
    match connect_async(format!("ws://{addr}/chat/ws?token={unknown}")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        Err(err) => panic!("unexpected upgrade failure: {err}"),
        Ok(_) => panic!("unknown token should be refused"),
    }
    assert!(state.hub.live_members(room.id).is_empty());
}
