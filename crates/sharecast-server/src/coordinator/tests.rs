use serde_json::{json, Value};
use sharecast_config::MediaConfig;
use tokio::sync::mpsc;

use super::*;
use crate::registry;
use crate::transport::InMemoryEngine;

struct Harness {
    coordinator: SessionCoordinator,
    engine: Arc<InMemoryEngine>,
}

impl Harness {
    fn new() -> Self {
        let engine = Arc::new(InMemoryEngine::from_config(&MediaConfig::default()));
        let coordinator =
            SessionCoordinator::new(registry::shared(), ConnectionIndex::new(), engine.clone());
        Self {
            coordinator,
            engine,
        }
    }

    async fn connect(&self, id: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let conn = ConnectionId::from(id);
        self.coordinator.connections().register(conn.clone(), tx).await;
        (conn, rx)
    }

    async fn send(&self, conn: &ConnectionId, frame: Value) {
        self.coordinator.handle_frame(conn, &frame.to_string()).await;
    }
}

/// Everything queued for a connection so far, as wire JSON.
fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(serde_json::from_str(&msg.encode()).unwrap());
    }
    out
}

fn events(msgs: &[Value]) -> Vec<String> {
    msgs.iter()
        .map(|m| m.as_object().unwrap().keys().next().unwrap().clone())
        .collect()
}

fn join(room: &str, user: &str) -> Value {
    json!({ "join-room": { "room_id": room, "user_id": user } })
}

#[tokio::test]
async fn r1_scenario() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    let (c, mut rx_c) = h.connect("c").await;

    // A creates r1.
    h.send(&a, join("r1", "a")).await;
    assert_eq!(
        drain(&mut rx_a),
        vec![
            json!({ "room-created": { "room_id": "r1" } }),
            json!({ "other-users": { "users": [] } }),
        ]
    );
    assert_eq!(events(&drain(&mut rx_b)), vec!["room-created"]);
    assert_eq!(events(&drain(&mut rx_c)), vec!["room-created"]);

    // B joins.
    h.send(&b, join("r1", "b")).await;
    assert_eq!(drain(&mut rx_b), vec![json!({ "other-users": { "users": ["a"] } })]);
    assert_eq!(drain(&mut rx_a), vec![json!({ "new-user": { "user_id": "b" } })]);

    // A shares.
    h.send(&a, json!({ "start-sharing": { "room_id": "r1", "user_id": "a" } }))
        .await;
    assert_eq!(
        drain(&mut rx_b),
        vec![json!({ "start-sharing": { "sharer_id": "a" } })]
    );
    assert!(drain(&mut rx_a).is_empty());

    // C joins a room that is being shared.
    h.send(&c, join("r1", "c")).await;
    assert_eq!(
        drain(&mut rx_c),
        vec![
            json!({ "other-users": { "users": ["a", "b"] } }),
            json!({ "start-sharing": { "sharer_id": "a" } }),
        ]
    );
    assert_eq!(drain(&mut rx_a), vec![json!({ "new-user": { "user_id": "c" } })]);
    assert!(drain(&mut rx_b).is_empty());

    // A drops.
    h.coordinator.disconnect(&a).await;
    for rx in [&mut rx_b, &mut rx_c] {
        assert_eq!(
            drain(rx),
            vec![
                json!({ "stop-sharing": {} }),
                json!({ "user-left": { "user_id": "a" } }),
            ]
        );
    }
    let snap = h.coordinator.registry().read().await.room_snapshot("r1").unwrap();
    assert_eq!(snap.users, vec!["b", "c"]);
    assert!(!snap.is_being_shared);
    assert_eq!(snap.sharer_id, None);

    // B and C leave; the room disappears.
    h.send(&b, json!({ "leave-room": { "room_id": "r1", "user_id": "b" } }))
        .await;
    h.coordinator.disconnect(&c).await;
    assert!(h.coordinator.registry().read().await.is_empty());
}

#[tokio::test]
async fn second_sharer_is_ignored() {
    let h = Harness::new();
    let (a, _rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    drain(&mut rx_b);

    h.send(&a, json!({ "start-sharing": { "room_id": "r1", "user_id": "a" } }))
        .await;
    h.send(&b, json!({ "start-sharing": { "room_id": "r1", "user_id": "b" } }))
        .await;

    let room = h.coordinator.registry().read().await.room_snapshot("r1").unwrap();
    assert_eq!(room.sharer_id.as_deref(), Some("a"));
    assert_eq!(events(&drain(&mut rx_b)), vec!["start-sharing"]);
}

#[tokio::test]
async fn non_member_cannot_start_sharing() {
    let h = Harness::new();
    let (a, _rx_a) = h.connect("a").await;
    let (z, _rx_z) = h.connect("z").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&z, json!({ "start-sharing": { "room_id": "r1", "user_id": "z" } }))
        .await;

    let room = h.coordinator.registry().read().await.room_snapshot("r1").unwrap();
    assert!(!room.is_being_shared);
}

#[tokio::test]
async fn any_member_may_stop_sharing() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    h.send(&a, json!({ "start-sharing": { "room_id": "r1", "user_id": "a" } }))
        .await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    h.send(&b, json!({ "stop-sharing": { "room_id": "r1", "user_id": "b" } }))
        .await;

    assert_eq!(drain(&mut rx_a), vec![json!({ "stop-sharing": {} })]);
    assert!(drain(&mut rx_b).is_empty());
    let room = h.coordinator.registry().read().await.room_snapshot("r1").unwrap();
    assert_eq!(room.sharer_id, None);
}

#[tokio::test]
async fn malformed_frame_is_answered_to_sender_only() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    h.coordinator.handle_frame(&a, "{not json").await;
    h.send(&a, json!({ "join-room": { "room_id": "r1" } })).await;

    assert_eq!(events(&drain(&mut rx_a)), vec!["error", "error"]);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn offers_reach_only_the_senders_room_verbatim() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    let (c, mut rx_c) = h.connect("c").await;
    let (x, mut rx_x) = h.connect("x").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    h.send(&c, join("r1", "c")).await;
    h.send(&x, join("r2", "x")).await;
    for rx in [&mut rx_a, &mut rx_b, &mut rx_c, &mut rx_x] {
        drain(rx);
    }

    let sdp = r#"{"type":"offer","sdp":"v=0\r\na=group:BUNDLE 0"}"#;
    let frame = format!(r#"{{"offer":{{"room_id":"r1","to":"b","sdp":{sdp}}}}}"#);
    h.coordinator.handle_frame(&a, &frame).await;

    for rx in [&mut rx_b, &mut rx_c] {
        let msg = rx.try_recv().unwrap();
        let ServerMessage::Offer { from, to, sdp: payload } = msg else {
            panic!("expected offer");
        };
        assert_eq!(from, a);
        assert_eq!(to, "b");
        assert_eq!(payload.get(), sdp);
    }
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_x).is_empty());
}

#[tokio::test]
async fn answers_and_candidates_go_to_one_connection() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("conn-a").await;
    let (b, mut rx_b) = h.connect("conn-b").await;
    let (c, mut rx_c) = h.connect("conn-c").await;
    h.send(&a, join("r1", "alice")).await;
    h.send(&b, join("r1", "bob")).await;
    h.send(&c, join("r1", "carol")).await;
    for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
        drain(rx);
    }

    // Addressed by connection id.
    h.send(
        &b,
        json!({ "answer": { "room_id": "r1", "to": "conn-a", "sdp": { "type": "answer", "sdp": "x" } } }),
    )
    .await;
    // Addressed by user id.
    h.send(
        &b,
        json!({ "ice-candidate": { "room_id": "r1", "to": "alice", "candidate": { "candidate": "c1" } } }),
    )
    .await;

    assert_eq!(
        drain(&mut rx_a),
        vec![
            json!({ "answer": { "from": "conn-b", "sdp": { "type": "answer", "sdp": "x" } } }),
            json!({ "ice-candidate": { "from": "conn-b", "candidate": { "candidate": "c1" } } }),
        ]
    );
    assert!(drain(&mut rx_c).is_empty());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn relay_to_departed_or_foreign_target_is_dropped() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, _rx_b) = h.connect("b").await;
    let (x, mut rx_x) = h.connect("x").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    h.send(&x, join("r2", "x")).await;
    drain(&mut rx_a);
    drain(&mut rx_x);

    h.coordinator.disconnect(&a).await;
    h.send(&b, json!({ "answer": { "room_id": "r1", "to": "a", "sdp": {} } }))
        .await;
    h.send(&b, json!({ "answer": { "room_id": "r1", "to": "x", "sdp": {} } }))
        .await;
    h.send(&b, json!({ "answer": { "room_id": "nope", "to": "x", "sdp": {} } }))
        .await;

    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_x).is_empty());
}

#[tokio::test]
async fn relay_from_outside_the_room_is_dropped() {
    let h = Harness::new();
    let (b, mut rx_b) = h.connect("b").await;
    let (x, mut rx_x) = h.connect("x").await;
    let (y, mut rx_y) = h.connect("y").await;
    h.send(&b, join("r1", "b")).await;
    h.send(&x, join("r2", "x")).await;
    h.send(&y, join("r2", "y")).await;
    for rx in [&mut rx_b, &mut rx_x, &mut rx_y] {
        drain(rx);
    }

    h.send(&b, json!({ "answer": { "room_id": "r2", "to": "x", "sdp": {} } }))
        .await;
    h.send(&b, json!({ "offer": { "room_id": "r2", "to": "y", "sdp": {} } }))
        .await;
    h.send(
        &b,
        json!({ "ice-candidate": { "room_id": "r2", "to": "y", "candidate": { "candidate": "c1" } } }),
    )
    .await;

    assert!(drain(&mut rx_x).is_empty());
    assert!(drain(&mut rx_y).is_empty());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn rejoin_does_not_reannounce() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&b, join("r1", "b")).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    h.send(&b, join("r1", "b")).await;
    assert_eq!(drain(&mut rx_b), vec![json!({ "other-users": { "users": ["a"] } })]);
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn concurrent_first_joins_create_room_once() {
    let h = Harness::new();
    let (_observer, mut rx_obs) = h.connect("observer").await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let coordinator = h.coordinator.clone();
        let (tx, _rx) = mpsc::channel(64);
        let conn = ConnectionId::from(format!("c{i}"));
        coordinator.connections().register(conn.clone(), tx).await;
        tasks.push(tokio::spawn(async move {
            coordinator.join(&conn, "r1", &format!("u{i}")).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let created = events(&drain(&mut rx_obs))
        .into_iter()
        .filter(|e| e == "room-created")
        .count();
    assert_eq!(created, 1);
    let snap = h.coordinator.registry().read().await.room_snapshot("r1").unwrap();
    assert_eq!(snap.users.len(), 16);
}

#[tokio::test]
async fn sfu_requests_get_responses() {
    let h = Harness::new();
    let (a, mut rx_a) = h.connect("a").await;
    h.send(&a, join("r1", "a")).await;
    drain(&mut rx_a);

    h.send(
        &a,
        json!({ "connect-producer-transport": {
            "request_id": 1, "room_id": "r1", "user_id": "a",
            "dtls_parameters": { "fingerprints": [] }
        } }),
    )
    .await;
    h.send(
        &a,
        json!({ "create-producer-transport": { "request_id": 2, "room_id": "r1", "user_id": "a" } }),
    )
    .await;
    h.send(
        &a,
        json!({ "connect-producer-transport": {
            "request_id": 3, "room_id": "r1", "user_id": "a",
            "dtls_parameters": { "fingerprints": [] }
        } }),
    )
    .await;
    h.send(
        &a,
        json!({ "produce": {
            "request_id": 4, "room_id": "r1", "user_id": "a",
            "kind": "video", "rtp_parameters": {}
        } }),
    )
    .await;

    let replies = drain(&mut rx_a);
    assert_eq!(replies.len(), 4);
    assert_eq!(
        replies[0],
        json!({ "response": { "request_id": 1, "error": "transport not found: producer transport" } })
    );
    assert_eq!(replies[1]["response"]["request_id"], 2);
    assert!(replies[1]["response"]["params"]["id"].is_string());
    assert!(replies[1]["response"]["params"]["iceCandidates"].is_array());
    assert_eq!(replies[2], json!({ "response": { "request_id": 3 } }));
    assert!(replies[3]["response"]["id"].is_string());
    assert_eq!(h.engine.live_producers().await, 1);

    h.coordinator.disconnect(&a).await;
    assert_eq!(h.engine.live_transports().await, 0);
    assert_eq!(h.engine.live_producers().await, 0);
}

#[tokio::test]
async fn disconnect_leaves_every_room_of_the_connection() {
    let h = Harness::new();
    let (a, _rx_a) = h.connect("a").await;
    let (b, mut rx_b) = h.connect("b").await;
    h.send(&a, join("r1", "a")).await;
    h.send(&a, join("r2", "a")).await;
    h.send(&b, join("r2", "b")).await;
    drain(&mut rx_b);

    h.coordinator.disconnect(&a).await;

    let reg = h.coordinator.registry().read().await;
    assert!(reg.room("r1").is_none());
    assert_eq!(reg.room_snapshot("r2").unwrap().users, vec!["b"]);
    drop(reg);
    assert_eq!(drain(&mut rx_b), vec![json!({ "user-left": { "user_id": "a" } })]);
    assert!(!h.coordinator.connections().is_live(&a).await);
}
