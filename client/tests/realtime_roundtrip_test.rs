//! Integration tests for the realtime channel.
//!
//! Each test runs an in-process WebSocket server, points a
//! [`RealtimeChannel`] at it and drives the connection through the token
//! channel, the same way the session store does.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use taskdeck_client::{
    ApiClient, ConnectionState, Frame, RealtimeChannel, RealtimeHandle, Task, TaskStatus,
    TaskStore,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Test Helpers
// =============================================================================

/// A WebSocket server that accepts connections and records their request URIs.
struct TestServer {
    listener: TcpListener,
    uris: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self {
            listener,
            uris: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}", self.listener.local_addr().unwrap())
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("no connection attempt")
            .unwrap();
        let uris = Arc::clone(&self.uris);
        let record = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uris.lock().unwrap().push(req.uri().to_string());
            Ok(resp)
        };
        tokio_tungstenite::accept_hdr_async(stream, record)
            .await
            .unwrap()
    }

    fn last_uri(&self) -> String {
        self.uris.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

fn create_store() -> TaskStore {
    let api = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
    TaskStore::new(api)
}

fn start_channel(
    server: &TestServer,
    store: &TaskStore,
    token: Option<&str>,
) -> (
    RealtimeHandle,
    watch::Sender<Option<String>>,
    JoinHandle<()>,
) {
    let channel = RealtimeChannel::new(&server.ws_url(), store.clone()).unwrap();
    let handle = channel.handle();
    let (token_tx, token_rx) = watch::channel(token.map(str::to_string));
    let task = tokio::spawn(channel.run(token_rx));
    (handle, token_tx, task)
}

async fn wait_for_state(handle: &RealtimeHandle, state: ConnectionState) {
    let mut rx = handle.state_updates();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .unwrap();
}

/// Polls the store until `check` holds.
async fn wait_until(store: &TaskStore, check: impl Fn(&TaskStore) -> bool) {
    timeout(WAIT, async {
        while !check(store) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("store never reached expected state");
}

fn event(kind: &str, payload: Value) -> Message {
    let frame = json!({ "event": "event", "data": { "type": kind, "payload": payload } });
    Message::Text(frame.to_string())
}

fn task_payload(id: &str, status: &str, version: u64) -> Value {
    json!({ "task": { "id": id, "title": id, "status": status, "version": version } })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_connects_with_token_in_query() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, _token_tx, _task) = start_channel(&server, &store, Some("tok-1"));

    let _ws = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    assert_eq!(server.last_uri(), "/ws?token=tok-1");
}

#[tokio::test]
async fn test_server_events_reach_store_in_order() {
    let server = TestServer::start().await;
    let store = create_store();
    let (_handle, _token_tx, _task) = start_channel(&server, &store, Some("tok"));

    let mut ws = server.accept().await;
    ws.send(event("task-created", task_payload("t1", "todo", 1)))
        .await
        .unwrap();
    ws.send(event("task-created", task_payload("t2", "todo", 1)))
        .await
        .unwrap();
    ws.send(event("task-updated", task_payload("t1", "done", 2)))
        .await
        .unwrap();
    ws.send(event("typing-started", json!({ "taskId": "t1", "userId": "u2" })))
        .await
        .unwrap();
    ws.send(Message::Text(
        json!({ "event": "event", "data": { "type": "task-archived", "payload": {} } })
            .to_string(),
    ))
    .await
    .unwrap();
    ws.send(event("task-deleted", json!({ "taskId": "t2" })))
        .await
        .unwrap();

    wait_until(&store, |s| s.task("t2").is_none() && s.task("t1").is_some()).await;

    let tasks = store.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Done);
    assert_eq!(tasks[0].version, 2);
}

#[tokio::test]
async fn test_intents_are_sent_while_connected() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, _token_tx, _task) = start_channel(&server, &store, Some("tok"));

    let mut ws = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    handle.join_task("t1");
    handle.typing_stopped("t1");

    let mut frames = Vec::new();
    while frames.len() < 2 {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("no intent received")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str::<Frame>(&text).unwrap());
        }
    }

    assert_eq!(frames[0].event, "join-task");
    assert_eq!(frames[0].data, json!({ "taskId": "t1" }));
    assert_eq!(frames[1].event, "typing-stopped");
}

#[tokio::test]
async fn test_clearing_token_disconnects() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, token_tx, _task) = start_channel(&server, &store, Some("tok"));

    let mut ws = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    token_tx.send(None).unwrap();
    wait_for_state(&handle, ConnectionState::Disconnected).await;

    // The server sees the socket close.
    let closed = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    // Intents are dropped while disconnected.
    handle.leave_task("t1");
}

#[tokio::test]
async fn test_token_change_reconnects_with_new_credentials() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, token_tx, _task) = start_channel(&server, &store, Some("old"));

    let _first = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;
    assert_eq!(server.last_uri(), "/ws?token=old");

    token_tx.send(Some("new".to_string())).unwrap();
    let _second = server.accept().await;

    assert_eq!(server.last_uri(), "/ws?token=new");
}

#[tokio::test]
async fn test_waits_for_token_before_connecting() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, token_tx, _task) = start_channel(&server, &store, None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(server.uris.lock().unwrap().is_empty());

    token_tx.send(Some("late".to_string())).unwrap();
    let _ws = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, _token_tx, _task) = start_channel(&server, &store, Some("tok"));

    let mut first = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;
    first.close(None).await.unwrap();

    // First reconnect is scheduled after roughly one second.
    let mut second = server.accept().await;
    second
        .send(event("task-created", task_payload("t5", "todo", 1)))
        .await
        .unwrap();

    wait_until(&store, |s| s.task("t5").is_some()).await;
    assert_eq!(store.task("t5").map(|t: Task| t.version), Some(1));
}

#[tokio::test]
async fn test_dropping_token_sender_stops_channel() {
    let server = TestServer::start().await;
    let store = create_store();
    let (handle, token_tx, task) = start_channel(&server, &store, Some("tok"));

    let _ws = server.accept().await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    drop(token_tx);

    timeout(WAIT, task)
        .await
        .expect("channel did not stop")
        .unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}
