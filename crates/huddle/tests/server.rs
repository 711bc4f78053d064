//! Integration tests for the Huddle server, handler, and full signaling
//! flow over WebSocket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle::prelude::*;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: String,
    rooms: Arc<RoomManager<LoopbackEngine>>,
    handle: JoinHandle<Result<(), HuddleError>>,
}

/// Starts a server on a random port.
async fn start_server(engine: &LoopbackEngine) -> TestServer {
    let server = HuddleServerBuilder::new()
        .bind("127.0.0.1:0")
        .build(engine.clone())
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let rooms = server.rooms();
    let handle = tokio::spawn(server.run());

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer {
        addr,
        rooms,
        handle,
    }
}

/// A signaling client that keeps notifications aside while it waits for
/// replies.
struct Client {
    ws: ClientWs,
    next_id: u64,
    notifications: VecDeque<Value>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("should connect");
        Self {
            ws,
            next_id: 1,
            notifications: VecDeque::new(),
        }
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("send");
    }

    /// Sends a request without waiting. Returns its id.
    async fn send(&mut self, request: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "id": id, "request": request });
        self.send_raw(&frame.to_string()).await;
        id
    }

    /// Reads the next server message.
    async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .expect("recv");
            if msg.is_text() || msg.is_binary() {
                return serde_json::from_slice(&msg.into_data()).expect("decode");
            }
        }
    }

    /// Reads until the reply (response or error) for `id` arrives.
    async fn reply_to(&mut self, id: u64) -> Value {
        loop {
            let msg = self.recv().await;
            if msg["type"] == "notification" {
                self.notifications.push_back(msg["event"].clone());
            } else if msg["id"] == id {
                return msg;
            }
        }
    }

    /// Sends a request and returns its successful `result`.
    async fn ok(&mut self, request: Value) -> Value {
        let id = self.send(request).await;
        let reply = self.reply_to(id).await;
        assert_eq!(reply["type"], "response", "unexpected reply: {reply}");
        reply["result"].clone()
    }

    /// Sends a request and returns its error `kind`.
    async fn err(&mut self, request: Value) -> String {
        let id = self.send(request).await;
        let reply = self.reply_to(id).await;
        assert_eq!(reply["type"], "error", "unexpected reply: {reply}");
        reply["kind"].as_str().expect("kind").to_owned()
    }

    /// Returns the next notification event.
    async fn notification(&mut self) -> Value {
        if let Some(event) = self.notifications.pop_front() {
            return event;
        }
        loop {
            let msg = self.recv().await;
            if msg["type"] == "notification" {
                return msg["event"].clone();
            }
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn join(room: &str, username: &str) -> Value {
    json!({ "type": "join-room", "roomId": room, "username": username })
}

fn create_transport(room: &str, direction: &str) -> Value {
    json!({ "type": "create-transport", "roomId": room, "direction": direction })
}

async fn wait_for_room_count(
    rooms: &RoomManager<LoopbackEngine>,
    expected: usize,
) {
    for _ in 0..200 {
        if rooms.room_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room count never reached {expected}");
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

// =========================================================================
// Full flow
// =========================================================================

#[tokio::test]
async fn test_two_peers_share_media_in_a_room() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut alice = Client::connect(&server.addr).await;
    let mut bob = Client::connect(&server.addr).await;

    // Alice is first: empty roster.
    let joined = alice.ok(join("r1", "alice")).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["peers"], json!([]));
    assert!(joined["capabilities"]["codecs"].is_array());

    // Bob sees Alice; Alice hears about Bob.
    let joined = bob.ok(join("r1", "bob")).await;
    let peers = joined["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["username"], "alice");
    let alice_id = peers[0]["id"].clone();

    let event = alice.notification().await;
    assert_eq!(event["type"], "user-joined");
    assert_eq!(event["username"], "bob");

    // Alice publishes audio.
    let send = alice.ok(create_transport("r1", "send")).await;
    assert_eq!(send["type"], "transport-created");
    assert!(send["iceParameters"].is_object());
    assert!(send["iceCandidates"].is_array());
    assert!(send["dtlsParameters"].is_object());
    let send_id = send["id"].clone();

    let connected = alice
        .ok(json!({
            "type": "connect-transport",
            "roomId": "r1",
            "transportId": send_id,
            "dtlsParameters": { "role": "client", "fingerprints": [] },
        }))
        .await;
    assert_eq!(connected, json!({ "type": "success", "success": true }));

    let produced = alice
        .ok(json!({
            "type": "produce",
            "roomId": "r1",
            "transportId": send_id,
            "kind": "audio",
            "rtpParameters": { "codecs": [] },
        }))
        .await;
    assert_eq!(produced["type"], "produced");
    let producer_id = produced["id"].clone();

    // Bob is told and can list it.
    let event = bob.notification().await;
    assert_eq!(event["type"], "new-producer");
    assert_eq!(event["peerId"], alice_id);
    assert_eq!(event["producerId"], producer_id);
    assert_eq!(event["kind"], "audio");

    let listed = bob
        .ok(json!({ "type": "get-producers", "roomId": "r1" }))
        .await;
    assert_eq!(
        listed["producers"],
        json!([{ "peerId": alice_id, "producerId": producer_id, "kind": "audio" }])
    );

    // Bob subscribes and resumes.
    let recv = bob.ok(create_transport("r1", "recv")).await;
    let consumed = bob
        .ok(json!({
            "type": "consume",
            "roomId": "r1",
            "transportId": recv["id"],
            "producerId": producer_id,
            "rtpCapabilities": { "codecs": [{ "kind": "audio", "mimeType": "audio/opus" }] },
        }))
        .await;
    assert_eq!(consumed["type"], "consumed");
    assert_eq!(consumed["producerId"], producer_id);
    assert_eq!(consumed["kind"], "audio");

    let resumed = bob
        .ok(json!({ "type": "resume-consumer", "roomId": "r1", "consumerId": consumed["id"] }))
        .await;
    assert_eq!(resumed["success"], true);
    assert_eq!(engine.stats().consumer_resumes, 1);

    // Alice drops; Bob is told; the room goes when Bob leaves too.
    alice.close().await;
    let event = bob.notification().await;
    assert_eq!(event["type"], "user-left");
    assert_eq!(event["peerId"], alice_id);
    assert_eq!(event["username"], "alice");
    assert!(bob.ok(json!({ "type": "get-producers", "roomId": "r1" })).await["producers"]
        .as_array()
        .unwrap()
        .is_empty());

    bob.close().await;
    wait_for_room_count(&server.rooms, 0).await;
    let stats = engine.stats();
    assert_eq!(stats.routers_created, 1);
    assert_eq!(stats.routers_closed, 1);
    assert_eq!(stats.consumers_closed, stats.consumers_created);
}

#[tokio::test]
async fn test_lone_peer_join_then_disconnect_removes_room() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut alice = Client::connect(&server.addr).await;

    alice.ok(join("solo", "alice")).await;
    assert!(server.rooms.room_status(&RoomId::from("solo")).await.exists);
    alice.close().await;

    wait_for_room_count(&server.rooms, 0).await;
    assert!(!server.rooms.room_status(&RoomId::from("solo")).await.exists);
    assert_eq!(engine.stats().routers_closed, 1);
}

#[tokio::test]
async fn test_close_transport_tells_consumers_producer_closed() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut alice = Client::connect(&server.addr).await;
    let mut bob = Client::connect(&server.addr).await;

    alice.ok(join("r1", "alice")).await;
    bob.ok(join("r1", "bob")).await;
    let send = alice.ok(create_transport("r1", "send")).await;
    let produced = alice
        .ok(json!({
            "type": "produce",
            "roomId": "r1",
            "transportId": send["id"],
            "kind": "video",
            "rtpParameters": {},
        }))
        .await;
    assert_eq!(bob.notification().await["type"], "new-producer");

    alice
        .ok(json!({ "type": "close-transport", "roomId": "r1", "transportId": send["id"] }))
        .await;

    let event = bob.notification().await;
    assert_eq!(event["type"], "producer-closed");
    assert_eq!(event["producerId"], produced["id"]);
}

// =========================================================================
// Errors
// =========================================================================

#[tokio::test]
async fn test_malformed_frame_gets_bad_request_and_connection_survives() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut client = Client::connect(&server.addr).await;

    client.send_raw("this is not json").await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["id"], 0);
    assert_eq!(reply["kind"], "bad-request");

    client.send_raw(r#"{"id":5,"request":{"type":"fly","roomId":"r1"}}"#).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["kind"], "bad-request");

    // Still usable.
    client.ok(join("r1", "alice")).await;

    // A valid id with a bad body keeps its id.
    client
        .send_raw(r#"{"id":6,"request":{"type":"produce","roomId":"r1","kind":"video"}}"#)
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["id"], 6);
    assert_eq!(reply["kind"], "bad-request");
    assert!(reply["error"].as_str().unwrap().contains("transportId"));

    // An id that is not a number falls back to 0.
    client.send_raw(r#"{"id":"seven","request":{}}"#).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 0);
}

#[tokio::test]
async fn test_request_errors_map_to_kinds() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut client = Client::connect(&server.addr).await;

    let kind = client
        .err(json!({ "type": "get-producers", "roomId": "r1" }))
        .await;
    assert_eq!(kind, "invalid-state");

    client.ok(join("r1", "alice")).await;
    assert_eq!(client.err(join("r1", "alice")).await, "already-joined");

    let kind = client
        .err(json!({
            "type": "connect-transport",
            "roomId": "r1",
            "transportId": "missing",
            "dtlsParameters": {},
        }))
        .await;
    assert_eq!(kind, "not-found");

    let kind = client.err(create_transport("r2", "send")).await;
    assert_eq!(kind, "not-found");

    let kind = client
        .err(json!({ "type": "resume-consumer", "roomId": "r1", "consumerId": "nope" }))
        .await;
    assert_eq!(kind, "not-found");
}

#[tokio::test]
async fn test_error_reply_keeps_request_id() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut client = Client::connect(&server.addr).await;

    client.next_id = 41;
    let id = client
        .send(json!({ "type": "leave-room", "roomId": "r1" }))
        .await;
    let reply = client.reply_to(id).await;
    assert_eq!(reply["id"], 41);
    assert_eq!(reply["kind"], "invalid-state");
    assert!(reply["error"].is_string());
}

// =========================================================================
// Shutdown and cancellation
// =========================================================================

#[tokio::test]
async fn test_worker_death_stops_server_with_engine_died() {
    let engine = LoopbackEngine::new();
    let server = start_server(&engine).await;
    let mut client = Client::connect(&server.addr).await;
    client.ok(join("r1", "alice")).await;

    engine.kill_worker();

    let result = tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("server should stop")
        .expect("server task should not panic");
    assert!(matches!(result, Err(HuddleError::EngineDied)));
    assert_eq!(server.rooms.room_count().await, 0);
    assert_eq!(engine.stats().routers_closed, 1);

    // The connection is closed by the server.
    let next = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.ws.next().await {
                Some(Ok(msg)) if msg.is_close() => return,
                Some(Ok(_)) => continue,
                _ => return,
            }
        }
    })
    .await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn test_disconnect_mid_request_discards_result_and_closes_transport() {
    let engine = LoopbackEngine::new().with_latency(Duration::from_millis(100));
    let server = start_server(&engine).await;
    let mut alice = Client::connect(&server.addr).await;
    let mut bob = Client::connect(&server.addr).await;

    alice.ok(join("r1", "alice")).await;
    bob.ok(join("r1", "bob")).await;

    alice.send(create_transport("r1", "send")).await;
    alice.close().await;

    let event = bob.notification().await;
    assert_eq!(event["type"], "user-left");

    wait_until(|| {
        let stats = engine.stats();
        stats.transports_created == 1 && stats.transports_closed == 1
    })
    .await;
    let status = server.rooms.room_status(&RoomId::from("r1")).await;
    assert_eq!(status.peer_count, 1);
    assert_eq!(status.peers[0].username, "bob");
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let engine = LoopbackEngine::new();
    let server = HuddleServerBuilder::new()
        .bind("127.0.0.1:0")
        .idle_timeout(Duration::from_millis(100))
        .build(engine.clone())
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap().to_string();
    let rooms = server.rooms();
    tokio::spawn(server.run());

    let mut client = Client::connect(&addr).await;
    client.ok(join("r1", "alice")).await;

    wait_for_room_count(&rooms, 0).await;
}
