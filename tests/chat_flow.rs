use std::time::Duration;

use murmur::{
    db::{self, RoomKind},
    error::CoreError,
    handoff::HandoffBridge,
    hub::{Connection, Delivery, Hub},
    notifications::aggregator,
    rooms::{self, RoomDetails, RoomEdit},
};
use pretty_assertions::assert_eq;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

async fn pool() -> SqlitePool {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&db_pool).await.unwrap();
    db_pool
}

fn users(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn admin_leaves_and_loses_connection() {
    let db_pool = pool().await;
    let hub = Hub::new();
    let bridge = HandoffBridge::new(Duration::from_secs(30));

    let details = RoomDetails { name: "R".into(), ..Default::default() };
    let room = rooms::create_room(&db_pool, RoomKind::Group, users(&["bob", "carol"]), "alice", details)
        .await
        .unwrap();

    // open-room hands (room, alice) to the upgrade through a token
    let token = bridge.issue(room.id, "alice");
    let ticket = bridge.claim(token, Duration::from_millis(100)).await.unwrap();
    let (conn, mut alice_inbox) = Connection::open(8);
    hub.subscribe(ticket.room_id, &ticket.user, conn);

    let edited = rooms::edit_room(&db_pool, &hub, room.id, RoomEdit::Leave, "alice").await.unwrap();

    assert_eq!(edited.members, users(&["bob", "carol"]));
    assert!(matches!(edited.admin.as_deref(), Some("bob") | Some("carol")));
    assert_eq!(alice_inbox.next().await, Delivery::Close);
    assert!(!hub.disconnect(room.id, "alice"));
}

#[tokio::test]
async fn unread_counts_follow_messages_and_reset_on_open() {
    let db_pool = pool().await;
    let hub = Hub::new();

    let c1 = rooms::create_room(&db_pool, RoomKind::Private, users(&["receiver"]), "sender", RoomDetails::default())
        .await
        .unwrap();
    for body in ["one", "two", "three"] {
        rooms::append_message(&db_pool, &hub, &c1, "sender", body).await.unwrap();
    }
    assert_eq!(aggregator::total_unread(&db_pool, "receiver").await.unwrap(), 3);

    aggregator::clear_on_open(&db_pool, c1.id, "receiver").await.unwrap();
    assert_eq!(aggregator::total_unread(&db_pool, "receiver").await.unwrap(), 0);
    assert_eq!(rooms::history(&db_pool, c1.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn reversed_private_pair_is_duplicate() {
    let db_pool = pool().await;
    rooms::create_room(&db_pool, RoomKind::Private, users(&["B"]), "A", RoomDetails::default())
        .await
        .unwrap();
    let again = rooms::create_room(&db_pool, RoomKind::Private, users(&["A"]), "B", RoomDetails::default()).await;
    assert!(matches!(again, Err(CoreError::Duplicate(_))));
}

#[tokio::test]
async fn removed_member_stops_receiving_room_traffic() {
    let db_pool = pool().await;
    let hub = Hub::new();
    let details = RoomDetails { name: "book club".into(), ..Default::default() };
    let room = rooms::create_room(&db_pool, RoomKind::Group, users(&["bob", "carol"]), "alice", details)
        .await
        .unwrap();

    let (bob_conn, mut bob_inbox) = Connection::open(8);
    let (carol_conn, mut carol_inbox) = Connection::open(8);
    hub.subscribe(room.id, "bob", bob_conn);
    hub.subscribe(room.id, "carol", carol_conn);

    let changes = rooms::RoomChanges { members: Some(users(&["bob"])), ..Default::default() };
    let room = rooms::edit_room(&db_pool, &hub, room.id, RoomEdit::Update(changes), "alice").await.unwrap();
    assert_eq!(carol_inbox.next().await, Delivery::Close);

    rooms::append_message(&db_pool, &hub, &room, "alice", "carol is gone").await.unwrap();
    let Delivery::Event(payload) = bob_inbox.next().await else {
        panic!("bob should still receive messages");
    };
    assert!(payload.contains("carol is gone"));

    let stale = rooms::append_message(&db_pool, &hub, &room, "carol", "let me back").await;
    assert!(matches!(stale, Err(CoreError::Authorization(_))));
    // carol is no longer a member, so nothing is counted for her
    assert_eq!(aggregator::total_unread(&db_pool, "carol").await.unwrap(), 0);
}
