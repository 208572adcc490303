#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_gateway::auth::tokens::Claims;
use chat_gateway::config::Config;
use chat_gateway::db::memory::MemoryChatStore;
use chat_gateway::push::PushQueue;
use chat_gateway::AppState;

pub const SECRET: &str = "integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// alice and bob share `room_ab`; carol is alone in `room_c`.
pub fn seeded_store() -> Arc<MemoryChatStore> {
    let store = Arc::new(MemoryChatStore::new());
    store.add_user("usr_alice", "alice", Some("tok_alice"));
    store.add_user("usr_bob", "bob", Some("tok_bob"));
    store.add_user("usr_carol", "carol", None);
    store.add_member("room_ab", "usr_alice");
    store.add_member("room_ab", "usr_bob");
    store.add_member("room_c", "usr_carol");
    store
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background until the test's runtime shuts down.
pub async fn start_server(store: Arc<MemoryChatStore>) -> (SocketAddr, AppState) {
    let state = AppState::new(Config::for_secret(SECRET), store, PushQueue::disabled());
    let app = chat_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub fn mint_token(user_id: &str) -> String {
    mint_token_with_secret(user_id, SECRET)
}

pub fn mint_token_with_secret(user_id: &str, secret: &str) -> String {
    let claims = Claims {
        id: user_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode token")
}

/// Open a gateway connection with the token in the query string, without
/// reading anything.
pub async fn open(addr: SocketAddr, token: Option<&str>) -> WsStream {
    let url = match token {
        Some(token) => format!("ws://{addr}/gateway?token={token}"),
        None => format!("ws://{addr}/gateway"),
    };
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("ws connect");
    ws
}

/// Open a gateway connection presenting the token as a bearer header.
pub async fn open_with_header(addr: SocketAddr, token: &str) -> WsStream {
    let mut request = format!("ws://{addr}/gateway")
        .into_client_request()
        .expect("client request");
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}").parse().expect("header value"),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

/// Connect as a user and consume READY. Returns the stream and READY's `d`.
pub async fn connect(addr: SocketAddr, user_id: &str) -> (WsStream, Value) {
    let mut ws = open(addr, Some(&mint_token(user_id))).await;
    let ready = next_json(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "ready");
    (ws, ready["d"].clone())
}

/// Read the next JSON frame, skipping pings.
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Read frames until the server closes; returns the close code and reason.
pub async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");

        match msg {
            Some(Ok(Message::Close(Some(frame)))) => {
                return (u16::from(frame.code), frame.reason.to_string());
            }
            Some(Ok(Message::Close(None))) | None => panic!("closed without a close frame"),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close frame, got: {other:?}"),
            Some(Err(e)) => panic!("ws read error: {e}"),
        }
    }
}

/// Assert that no frame arrives within a short window.
pub async fn expect_silence(ws: &mut WsStream) {
    if let Ok(Some(Ok(msg))) = time::timeout(Duration::from_millis(300), ws.next()).await {
        panic!("expected no frame, got: {msg:?}");
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

pub async fn send_event(ws: &mut WsStream, event: &str, data: Value) {
    send_json(ws, serde_json::json!({ "op": 0, "t": event, "d": data })).await;
}
