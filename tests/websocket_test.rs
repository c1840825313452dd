//! End-to-end classroom socket tests against a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use online_classroom::api::{ApiServer, AppState};
use online_classroom::config::{ApiServerConfig, RealtimeConfig, SandboxConfig};
use online_classroom::execution::{DockerSandbox, ExecutionQuota, ExecutionService};
use online_classroom::realtime::{ClassroomManager, SessionHub, SessionRegistry};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: SessionHub,
    _shutdown: watch::Sender<bool>,
}

async fn start_server() -> TestServer {
    let hub = SessionHub::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(ClassroomManager::new()),
        RealtimeConfig::default(),
    );
    let executions = Arc::new(ExecutionService::new(
        Arc::new(DockerSandbox::new(&SandboxConfig::default())),
        ExecutionQuota::unlimited(),
    ));
    let config = ApiServerConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        cors_origins: Vec::new(),
        public_ws_url: Url::parse("ws://127.0.0.1").unwrap(),
        auth_enabled: false,
        jwt_secret: "integration-secret".to_string(),
    };
    let state = AppState::new(config, hub.clone(), executions).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        ApiServer::new(state).serve(listener, shutdown_rx).await.unwrap();
    });

    TestServer {
        addr,
        hub,
        _shutdown: shutdown_tx,
    }
}

/// Connect and consume the connection acknowledgement
async fn join(addr: SocketAddr, lecture_id: u64, zcode: &str, role: &str) -> Client {
    let url = format!(
        "ws://{}/ws/classroom/{}?zcode={}&role={}",
        addr, lecture_id, zcode, role
    );
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let ack = next_frame(&mut client).await.unwrap();
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["data"]["user_zcode"], zcode);
    assert_eq!(ack["data"]["user_role"], role);
    assert_eq!(ack["data"]["lecture_id"], lecture_id);
    client
}

/// Next JSON frame, skipping control frames; `None` on close or timeout
async fn next_frame(client: &mut Client) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .ok()??;
        match message.ok()? {
            Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
            Message::Binary(data) => return Some(serde_json::from_slice(&data).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Collect frames until the socket stays quiet for a short while
async fn drain(client: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(300), client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => frames.push(serde_json::from_str(&text).unwrap()),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return frames,
        }
    }
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_chat_reaches_everyone_with_one_id() {
    let server = start_server().await;
    let mut teacher = join(server.addr, 5, "t1", "teacher").await;
    let mut s1 = join(server.addr, 5, "s1", "student").await;
    let mut s2 = join(server.addr, 5, "s2", "student").await;
    drain(&mut teacher).await;
    drain(&mut s1).await;

    send(&mut s1, json!({"type": "chat_message", "data": {"message": "hi"}})).await;

    let mut ids = Vec::new();
    for client in [&mut teacher, &mut s1, &mut s2] {
        let frame = next_frame(client).await.unwrap();
        assert_eq!(frame["type"], "chat_message");
        assert_eq!(frame["sender"], "s1");
        assert_eq!(frame["data"]["content"], "hi");
        assert_eq!(frame["data"]["sender_id"], "s1");
        ids.push(frame["data"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);

    let snapshot = server.hub.classrooms().snapshot(5);
    assert_eq!(snapshot.chat_messages.len(), 1);
    assert_eq!(snapshot.online_count, 3);
}

#[tokio::test]
async fn test_student_document_goes_to_teacher_only() {
    let server = start_server().await;
    let mut teacher = join(server.addr, 7, "t1", "teacher").await;
    let mut student = join(server.addr, 7, "42", "student").await;
    let mut other = join(server.addr, 7, "43", "student").await;
    drain(&mut teacher).await;
    drain(&mut student).await;

    send(
        &mut student,
        json!({
            "type": "yjs_update",
            "data": {"document_key": "student-42", "update": [1, 2, 3]},
            "sender": "t1"
        }),
    )
    .await;

    let frame = next_frame(&mut teacher).await.unwrap();
    assert_eq!(frame["type"], "yjs_update");
    assert_eq!(frame["sender"], "42");
    assert_eq!(frame["data"]["document_key"], "student-42");
    assert_eq!(frame["data"]["update"], json!([1, 2, 3]));

    // Writing the teacher's document is dropped without notice
    send(
        &mut student,
        json!({"type": "yjs_update", "data": {"document_key": "teacher-code", "update": [9]}}),
    )
    .await;

    assert!(drain(&mut teacher).await.is_empty());
    assert!(drain(&mut other).await.is_empty());
    assert!(drain(&mut student).await.is_empty());
}

#[tokio::test]
async fn test_reconnect_replaces_without_leave() {
    let server = start_server().await;
    let mut teacher = join(server.addr, 9, "t1", "teacher").await;
    let mut first = join(server.addr, 9, "s1", "student").await;

    let joined = next_frame(&mut teacher).await.unwrap();
    assert_eq!(joined["type"], "user_join");

    let mut second = join(server.addr, 9, "s1", "student").await;

    // The old socket is closed by the server
    assert!(next_frame(&mut first).await.is_none());

    let frames = drain(&mut teacher).await;
    assert!(frames.iter().all(|frame| frame["type"] != "user_leave"));
    assert_eq!(server.hub.registry().connection_count(9), 2);
    assert!(server.hub.registry().get(9, "s1").is_some());
    assert!(server.hub.registry().get(9, "t1").is_some());
    assert_eq!(server.hub.classrooms().snapshot(9).online_count, 2);

    // The replacement still receives traffic
    send(&mut teacher, json!({"type": "chat_message", "data": {"message": "still here?"}})).await;
    let frame = next_frame(&mut second).await.unwrap();
    assert_eq!(frame["data"]["content"], "still here?");
    drain(&mut teacher).await;

    // Closing the live socket is a real leave
    second.close(None).await.unwrap();
    let left = next_frame(&mut teacher).await.unwrap();
    assert_eq!(left["type"], "user_leave");
    assert_eq!(left["data"]["user_zcode"], "s1");
    assert_eq!(left["data"]["online_count"], 1);
}

#[tokio::test]
async fn test_upgrade_without_role_is_rejected() {
    let server = start_server().await;
    let url = format!("ws://{}/ws/classroom/3?zcode=s1", server.addr);

    assert!(connect_async(url.as_str()).await.is_err());
    assert_eq!(server.hub.registry().stats().total_connections, 0);
}
