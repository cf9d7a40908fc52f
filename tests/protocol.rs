use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devsync::config::Limits;
use devsync::messages::ServerMessage;
use devsync::persistence::{JsonFileStore, MemoryStore, RoomStore};
use devsync::registry::RoomRegistry;
use devsync::room::WELCOME_CODE;
use devsync::routes::routes;
use devsync::server::Server;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn new_server(store: Arc<dyn RoomStore>) -> Arc<Server> {
    Arc::new(Server::new(
        Arc::new(RoomRegistry::new()),
        &Limits::default(),
        store,
    ))
}

fn start(server: Arc<Server>) -> SocketAddr {
    let (addr, serving) = warp::serve(routes(server)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket handshake");
    ws
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .expect("send frame");
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("server event");
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

async fn wait_for_rooms(server: &Server, expected: usize) {
    for _ in 0..100 {
        if server.registry().room_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room count never reached {expected}");
}

fn usernames(users: &[devsync::room::User]) -> Vec<&str> {
    users.iter().map(|u| u.username.as_str()).collect()
}

#[tokio::test]
async fn alice_and_bob_share_a_room() {
    let server = new_server(Arc::new(MemoryStore::default()));
    let addr = start(Arc::clone(&server));
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, json!({ "type": "joinRoom", "roomId": "r1", "username": "alice" })).await;
    match recv(&mut alice).await {
        ServerMessage::RoomJoined(snapshot) => {
            assert_eq!(snapshot.code, WELCOME_CODE);
            assert!(snapshot.files.is_empty());
            assert!(snapshot.messages.is_empty());
            assert_eq!(usernames(&snapshot.users), ["alice"]);
        }
        other => panic!("expected roomJoined, got {other:?}"),
    }

    send(&mut bob, json!({ "type": "joinRoom", "roomId": "r1", "username": "bob" })).await;
    match recv(&mut bob).await {
        ServerMessage::RoomJoined(snapshot) => {
            assert_eq!(snapshot.code, WELCOME_CODE);
            assert_eq!(usernames(&snapshot.users), ["alice", "bob"]);
        }
        other => panic!("expected roomJoined, got {other:?}"),
    }
    match recv(&mut alice).await {
        ServerMessage::UserJoined { username, users, .. } => {
            assert_eq!(username, "bob");
            assert_eq!(usernames(&users), ["alice", "bob"]);
        }
        other => panic!("expected userJoined, got {other:?}"),
    }

    send(&mut alice, json!({ "type": "sendCodeChange", "roomId": "r1", "code": "x=1" })).await;
    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::CodeChange {
            code: "x=1".into(),
            file_id: None
        }
    );

    send(&mut alice, json!({ "type": "sendChatMessage", "roomId": "r1", "message": "hi" })).await;
    let for_alice = recv(&mut alice).await;
    let for_bob = recv(&mut bob).await;
    assert_eq!(for_alice, for_bob);
    match for_alice {
        ServerMessage::Chat(message) => {
            assert_eq!(message.text, "hi");
            assert_eq!(message.username, "alice");
            assert!(message.timestamp > 0);
        }
        other => panic!("expected chatMessage, got {other:?}"),
    }

    bob.close(None).await.expect("close bob");
    match recv(&mut alice).await {
        ServerMessage::UserLeft { username, users, .. } => {
            assert_eq!(username, "bob");
            assert_eq!(usernames(&users), ["alice"]);
        }
        other => panic!("expected userLeft, got {other:?}"),
    }
    assert_eq!(server.registry().room_count().await, 1);

    alice.close(None).await.expect("close alice");
    wait_for_rooms(&server, 0).await;
}

#[tokio::test]
async fn code_changes_are_not_echoed_to_sender() {
    let server = new_server(Arc::new(MemoryStore::default()));
    let addr = start(server);
    let mut alice = connect(addr).await;

    send(&mut alice, json!({ "type": "joinRoom", "roomId": "solo", "username": "alice" })).await;
    assert!(matches!(recv(&mut alice).await, ServerMessage::RoomJoined(_)));

    send(&mut alice, json!({ "type": "sendCodeChange", "roomId": "solo", "code": "typing" })).await;
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn uploader_receives_authoritative_file_copy() {
    let server = new_server(Arc::new(MemoryStore::default()));
    let addr = start(server);
    let mut alice = connect(addr).await;

    send(&mut alice, json!({ "type": "joinRoom", "roomId": "r1", "username": "alice" })).await;
    recv(&mut alice).await;

    let file = json!({
        "id": "f1",
        "name": "main.py",
        "content": "print(1)",
        "language": "python"
    });
    send(&mut alice, json!({ "type": "createFile", "roomId": "r1", "file": file.clone() })).await;
    match recv(&mut alice).await {
        ServerMessage::FileCreated { file } => {
            assert_eq!(file.id, "f1");
            assert_eq!(file.created_by, "alice");
            assert_eq!(file.content, "print(1)");
        }
        other => panic!("expected fileCreated, got {other:?}"),
    }

    send(&mut alice, json!({ "type": "createFile", "roomId": "r1", "file": file })).await;
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn bad_frames_get_private_errors() {
    let server = new_server(Arc::new(MemoryStore::default()));
    let addr = start(server);
    let mut alice = connect(addr).await;

    send(&mut alice, json!({ "type": "joinRoom", "roomId": "r1" })).await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::error("Missing roomId or username")
    );

    alice
        .send(Message::text("{{{"))
        .await
        .expect("send garbage");
    assert!(matches!(recv(&mut alice).await, ServerMessage::Error { .. }));

    send(&mut alice, json!({ "type": "joinRoom", "roomId": "r1", "username": "alice" })).await;
    assert!(matches!(recv(&mut alice).await, ServerMessage::RoomJoined(_)));
}

#[tokio::test]
async fn saved_room_survives_being_emptied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).await.expect("open store");
    let server = new_server(Arc::new(store));
    let addr = start(Arc::clone(&server));

    let mut alice = connect(addr).await;
    send(&mut alice, json!({ "type": "joinRoom", "roomId": "keep", "username": "alice" })).await;
    recv(&mut alice).await;
    let edit = json!({ "type": "sendCodeChange", "roomId": "keep", "code": "precious" });
    send(&mut alice, edit).await;
    send(&mut alice, json!({ "type": "saveRoom", "roomId": "keep" })).await;
    assert!(matches!(
        recv(&mut alice).await,
        ServerMessage::RoomSaved { room_id, .. } if room_id == "keep"
    ));
    alice.close(None).await.expect("close alice");
    wait_for_rooms(&server, 0).await;

    let mut bob = connect(addr).await;
    send(&mut bob, json!({ "type": "joinRoom", "roomId": "keep", "username": "bob" })).await;
    match recv(&mut bob).await {
        ServerMessage::RoomJoined(snapshot) => assert_eq!(snapshot.code, WELCOME_CODE),
        other => panic!("expected roomJoined, got {other:?}"),
    }

    send(&mut bob, json!({ "type": "loadRoom", "roomId": "keep" })).await;
    match recv(&mut bob).await {
        ServerMessage::RoomRestored(snapshot) => {
            assert_eq!(snapshot.code, "precious");
            assert_eq!(usernames(&snapshot.users), ["bob"]);
        }
        other => panic!("expected roomRestored, got {other:?}"),
    }
}

#[tokio::test]
async fn health_reports_room_count() {
    let server = new_server(Arc::new(MemoryStore::default()));
    let filter = routes(Arc::clone(&server));

    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).expect("json body");
    assert_eq!(body["status"], "OK");
    assert_eq!(body["rooms"], 0);
    assert!(body["timestamp"].is_string());

    let (id, _rx) = server.register().await;
    server
        .handle_text(&id, r#"{"type":"joinRoom","roomId":"r1","username":"alice"}"#)
        .await;

    let response = warp::test::request().path("/health").reply(&filter).await;
    let body: Value = serde_json::from_slice(response.body()).expect("json body");
    assert_eq!(body["rooms"], 1);
}
