//! PlatformClient against a local HTTP server

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use thread_bridge::{ApiError, NewThread, PlatformClient, ThreadApi};

const TOKEN: &str = "test-token";

/// Requests seen by the fake platform: (method, path, body)
type Recorded = Arc<Mutex<Vec<(String, String, Value)>>>;

async fn spawn_platform() -> (SocketAddr, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/channels/{id}", get(get_channel).patch(patch_channel))
        .route("/channels/{id}/threads", post(create_thread))
        .route("/channels/{id}/messages", post(create_message))
        .with_state(recorded.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bot {}", TOKEN))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "401: Unauthorized"}))).into_response()
}

fn unknown_channel() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "Unknown Channel", "code": 10003})),
    )
        .into_response()
}

async fn get_channel(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if id == "missing" {
        return unknown_channel();
    }
    Json(json!({
        "id": id,
        "name": "Support-Jane[u42]",
        "type": 11,
        "thread_metadata": {"archived": id == "old"}
    }))
    .into_response()
}

async fn patch_channel(
    State(recorded): State<Recorded>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if id == "missing" {
        return unknown_channel();
    }
    recorded
        .lock()
        .push(("PATCH".to_string(), format!("/channels/{}", id), body));
    Json(json!({"id": id, "thread_metadata": {"archived": true}})).into_response()
}

async fn create_thread(
    State(recorded): State<Recorded>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let name = body["name"].clone();
    recorded
        .lock()
        .push(("POST".to_string(), format!("/channels/{}/threads", id), body));
    (
        StatusCode::CREATED,
        Json(json!({"id": "t-new", "name": name, "type": 11})),
    )
        .into_response()
}

async fn create_message(
    State(recorded): State<Recorded>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if id == "missing" {
        return unknown_channel();
    }
    if body["content"].as_str().is_some_and(|c| c.is_empty()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Cannot send an empty message"})),
        )
            .into_response();
    }
    recorded
        .lock()
        .push(("POST".to_string(), format!("/channels/{}/messages", id), body));
    Json(json!({"id": "msg-1", "channel_id": id})).into_response()
}

fn client(addr: SocketAddr, token: &str) -> PlatformClient {
    PlatformClient::new(&format!("http://{}", addr), token, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_thread() {
    let (addr, _) = spawn_platform().await;
    let api = client(addr, TOKEN);

    let thread = api.fetch_thread("t1").await.unwrap();
    assert_eq!(thread.id, "t1");
    assert!(!thread.archived);

    assert!(api.fetch_thread("old").await.unwrap().archived);
}

#[tokio::test]
async fn test_missing_thread_is_remote_not_found() {
    let (addr, _) = spawn_platform().await;
    let api = client(addr, TOKEN);

    let err = api.fetch_thread("missing").await.unwrap_err();
    assert!(err.is_not_found());

    let err = api.send_message("missing", "hi", None).await.unwrap_err();
    assert!(matches!(err, ApiError::RemoteNotFound(_)));
}

#[tokio::test]
async fn test_bad_credential_is_status_error() {
    let (addr, _) = spawn_platform().await;
    let api = client(addr, "wrong");

    match api.fetch_thread("t1").await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Unauthorized"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_thread_request_shape() {
    let (addr, recorded) = spawn_platform().await;
    let api = client(addr, TOKEN);

    let request = NewThread {
        name: "Support-Jane[u42]".to_string(),
        auto_archive_duration: 1440,
    };
    let thread = api.create_thread("support-1", &request).await.unwrap();
    assert_eq!(thread.id, "t-new");
    assert_eq!(thread.name.as_deref(), Some("Support-Jane[u42]"));

    let recorded = recorded.lock();
    let (method, path, body) = &recorded[0];
    assert_eq!(method, "POST");
    assert_eq!(path, "/channels/support-1/threads");
    assert_eq!(body["name"], "Support-Jane[u42]");
    assert_eq!(body["auto_archive_duration"], 1440);
    assert_eq!(body["type"], 11);
}

#[tokio::test]
async fn test_send_message_with_reply() {
    let (addr, recorded) = spawn_platform().await;
    let api = client(addr, TOKEN);

    let sent = api.send_message("t1", "hello", Some("m9")).await.unwrap();
    assert_eq!(sent.id, "msg-1");
    assert_eq!(sent.channel_id.as_deref(), Some("t1"));

    api.send_message("t1", "plain", None).await.unwrap();

    let recorded = recorded.lock();
    assert_eq!(recorded[0].2["content"], "hello");
    assert_eq!(recorded[0].2["message_reference"]["message_id"], "m9");
    assert!(recorded[1].2.get("message_reference").is_none());
}

#[tokio::test]
async fn test_rejected_message_is_status_error() {
    let (addr, _) = spawn_platform().await;
    let api = client(addr, TOKEN);

    let err = api.send_message("t1", "", None).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 400, .. }));
}

#[tokio::test]
async fn test_archive_thread() {
    let (addr, recorded) = spawn_platform().await;
    let api = client(addr, TOKEN);

    api.archive_thread("t1").await.unwrap();
    assert!(api.archive_thread("missing").await.unwrap_err().is_not_found());

    let recorded = recorded.lock();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "PATCH");
    assert_eq!(recorded[0].2, json!({"archived": true}));
}
