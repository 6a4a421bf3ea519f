//! Conversation session tests: REST bootstrap plus a live run socket

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use mail_console::api::ApiClient;
use mail_console::session::{RunSession, SubmitOutcome};
use mail_console::transport::{Backoff, ReconnectPolicy};
use shared_types::MessageKind;

#[derive(Clone)]
struct FakeApp {
    state_blob: String,
    marked_read: Arc<Mutex<Vec<String>>>,
    message_queries: Arc<Mutex<Vec<Option<String>>>>,
    received: mpsc::UnboundedSender<String>,
}

struct TestServer {
    addr: SocketAddr,
    marked_read: Arc<Mutex<Vec<String>>>,
    message_queries: Arc<Mutex<Vec<Option<String>>>>,
    received: mpsc::UnboundedReceiver<String>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_task(State(app): State<FakeApp>, Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "ID": id,
        "Name": "Vendor triage",
        "Description": "Sort vendor mail",
        "State": app.state_blob,
    }))
}

#[derive(serde::Deserialize)]
struct MessageQuery {
    #[serde(rename = "taskId")]
    task_id: Option<String>,
}

async fn list_messages(
    State(app): State<FakeApp>,
    Query(query): Query<MessageQuery>,
) -> Json<Value> {
    app.message_queries.lock().unwrap().push(query.task_id);
    Json(json!([
        {"ID": "m1", "TaskID": "t1", "Content": "New invoice", "Read": false},
        {"ID": "m2", "TaskID": "t1", "Content": "Old invoice", "Read": true}
    ]))
}

async fn mark_read(State(app): State<FakeApp>, Path(id): Path<String>) {
    app.marked_read.lock().unwrap().push(id);
}

async fn run_socket(ws: WebSocketUpgrade, State(app): State<FakeApp>) -> Response {
    ws.on_upgrade(move |socket| stream_reply(socket, app))
}

fn frame(content: &str, kind: &str) -> String {
    json!({
        "id": "call_1",
        "frame": {
            "id": "call_1",
            "tool": {"name": "copilot"},
            "output": [{"content": content}],
            "type": kind
        },
        "state": {"call_1": {"id": "call_1", "type": kind}}
    })
    .to_string()
}

async fn stream_reply(mut socket: WebSocket, app: FakeApp) {
    for (content, kind) in [
        ("⏳⏳⏳ Waiting for model response...", "callProgress"),
        ("Hi", "callProgress"),
        ("⏳⏳⏳ Waiting for model response...", "callProgress"),
        ("Hi there", "callFinish"),
    ] {
        if socket
            .send(Message::Text(frame(content, kind).into()))
            .await
            .is_err()
        {
            return;
        }
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let _ = app.received.send(text.as_str().to_string());
        }
    }
}

async fn start_test_server(history: Value) -> TestServer {
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let app = FakeApp {
        state_blob: STANDARD.encode(history.to_string()),
        marked_read: Arc::new(Mutex::new(Vec::new())),
        message_queries: Arc::new(Mutex::new(Vec::new())),
        received: received_tx,
    };
    let marked_read = app.marked_read.clone();
    let message_queries = app.message_queries.clone();

    let router = Router::new()
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/run", get(run_socket))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/{id}", post(mark_read))
        .with_state(app);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        addr,
        marked_read,
        message_queries,
        received: received_rx,
        handle,
    }
}

fn history() -> Value {
    json!({
        "continuation": {"state": {"completion": {"messages": [
            {"role": "system", "content": [{"text": "You are a mail assistant"}]},
            {"role": "user", "content": [{"text": "Any invoices?"}]},
            {"role": "assistant", "content": [{"text": "Two invoices arrived."}]}
        ]}}}
    })
}

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        delay: Duration::from_millis(100),
        backoff: Backoff::Fixed,
        max_attempts: None,
        connect_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_session_restores_history_and_streams_reply() {
    let mut server = start_test_server(history()).await;
    let api = ApiClient::new(
        &format!("http://{}", server.addr),
        Some("tok".to_string()),
        Duration::from_secs(5),
    )
    .expect("Failed to build client");

    let mut session = RunSession::start(&api, "t1", policy())
        .await
        .expect("Failed to start session");

    assert_eq!(session.task().name, "Vendor triage");
    let restored: Vec<_> = session
        .transcript()
        .messages
        .iter()
        .map(|m| (m.kind, m.text.clone()))
        .collect();
    assert_eq!(
        restored,
        vec![
            (MessageKind::User, "Any invoices?".to_string()),
            (MessageKind::Bot, "Two invoices arrived.".to_string()),
        ]
    );
    assert_eq!(*server.marked_read.lock().unwrap(), vec!["m1".to_string()]);
    assert_eq!(
        *server.message_queries.lock().unwrap(),
        vec![Some("t1".to_string())]
    );

    timeout(Duration::from_secs(5), async {
        while session.transcript().messages.len() < 3 || session.transcript().generating {
            let event = session.next_event().await.expect("Transport stopped");
            session.handle_event(event);
        }
    })
    .await
    .expect("Timeout waiting for reply");

    let reply = &session.transcript().messages[2];
    assert_eq!(reply.kind, MessageKind::Bot);
    assert_eq!(reply.text, "Hi there");
    assert_eq!(reply.tool_name.as_deref(), Some("copilot"));
    assert_eq!(session.transcript().cursor, None);

    assert_eq!(session.submit("   "), SubmitOutcome::Ignored);
    assert_eq!(session.submit("  Archive them  "), SubmitOutcome::Sent);
    let sent = timeout(Duration::from_secs(5), server.received.recv())
        .await
        .expect("Timeout waiting for outbound message")
        .expect("Server channel closed");
    assert_eq!(sent, "Archive them");

    let last = session.transcript().messages.last().unwrap();
    assert_eq!(last.kind, MessageKind::User);
    assert_eq!(last.text, "Archive them");

    session.close().await;
}

#[tokio::test]
async fn test_state_without_conversation_starts_empty() {
    let server = start_test_server(json!({})).await;
    let api = ApiClient::new(
        &format!("http://{}", server.addr),
        None,
        Duration::from_secs(5),
    )
    .expect("Failed to build client");

    let session = RunSession::start(&api, "t1", policy())
        .await
        .expect("Failed to start session");
    assert!(session.transcript().messages.is_empty());
    session.close().await;
}
