//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::auth::middleware::HandshakeToken;
use crate::error::GatewayError;
use crate::AppState;

use super::connection::SessionHandle;
use super::engine::HEARTBEAT_INTERVAL_MS;
use super::events::{
    ClientEvent, ClientMessage, Dispatch, GatewayMessage, HeartbeatPayload, OP_DISPATCH, OP_HEARTBEAT,
};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    HandshakeToken(token): HandshakeToken,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, token))
}

async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_tx, ws_rx) = socket.split();

    let Some(token) = token else {
        let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Token not provided").await;
        return;
    };

    let user_id = match state.verifier.verify(&token).await {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::debug!(error = %err, "handshake token rejected");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Invalid token").await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(state.config.outbound_buffer.max(1));
    let conn = match state.engine.connect(&user_id, tx).await {
        Ok(conn) => conn,
        Err(GatewayError::AuthRejected(reason)) => {
            tracing::debug!(%reason, "connection rejected");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Invalid token").await;
            return;
        }
        Err(err) => {
            tracing::warn!(%user_id, error = %err, "failed to admit connection");
            let reason = err.client_message().unwrap_or_else(|| "Internal error".to_string());
            let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, &reason).await;
            return;
        }
    };

    run_session(&state, &conn, ws_tx, ws_rx, rx).await;

    state.engine.disconnect(&conn).await;
}

/// Main session event loop: read client frames, forward queued events,
/// enforce heartbeat.
async fn run_session(
    state: &AppState,
    conn: &SessionHandle,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound: mpsc::Receiver<Arc<Dispatch>>,
) {
    let mut heartbeat_timer = heartbeat_timer(heartbeat_deadline());
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                if !send_json(&mut ws_tx, &GatewayMessage::heartbeat_ack(payload.seq)).await {
                                    break;
                                }
                            }
                            OP_DISPATCH => {
                                let Some(name) = client_msg.t else {
                                    let err = GatewayError::InvalidPayload("Missing event name".to_string());
                                    state.engine.reject(conn, "", err);
                                    continue;
                                };
                                match ClientEvent::parse(&name, client_msg.d) {
                                    Ok(event) => state.engine.handle(conn, event).await,
                                    Err(err) => state.engine.reject(conn, &name, err),
                                }
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %conn.id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            queued = outbound.recv() => {
                let Some(dispatch) = queued else {
                    break;
                };
                let msg = GatewayMessage::dispatch(dispatch.event_name, conn.next_seq(), dispatch.data.clone());
                if !send_json(&mut ws_tx, &msg).await {
                    break;
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %conn.id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Client must heartbeat within 1.5× the advertised interval.
fn heartbeat_deadline() -> Duration {
    Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2)
}

/// First tick lands one full deadline after the session starts. A tick
/// missed while the loop was busy pushes the schedule back instead of
/// firing the backlog in a burst.
fn heartbeat_timer(deadline: Duration) -> Interval {
    let mut timer = time::interval_at(Instant::now() + deadline, deadline);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Serialize and send a frame. Returns `false` once the socket is gone.
async fn send_json(ws_tx: &mut WsSink, msg: &GatewayMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize gateway message");
            true
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
