//! Gateway opcodes, event types, and wire-format messages.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::message::{MessageKind, MessageWithSender};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Inbound event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(alias = "chatId")]
    pub room_id: String,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: String,
    #[serde(alias = "chatId")]
    pub room_id: String,
}

/// Payload shared by `join_room`, `mark_read` and `typing`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[serde(alias = "chatId")]
    pub room_id: String,
}

/// A validated inbound event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    DeleteMessage(DeleteMessagePayload),
    JoinRoom(RoomPayload),
    MarkRead(RoomPayload),
    Typing(RoomPayload),
}

impl ClientEvent {
    /// Decode the `d` field of a DISPATCH frame according to its event name `t`.
    pub fn parse(name: &str, data: Value) -> Result<Self, GatewayError> {
        match name {
            EventName::SEND_MESSAGE => payload(name, data).map(Self::SendMessage),
            EventName::DELETE_MESSAGE => payload(name, data).map(Self::DeleteMessage),
            EventName::JOIN_ROOM => payload(name, data).map(Self::JoinRoom),
            EventName::MARK_READ => payload(name, data).map(Self::MarkRead),
            EventName::TYPING => payload(name, data).map(Self::Typing),
            other => Err(GatewayError::InvalidPayload(format!("Unknown event: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => EventName::SEND_MESSAGE,
            Self::DeleteMessage(_) => EventName::DELETE_MESSAGE,
            Self::JoinRoom(_) => EventName::JOIN_ROOM,
            Self::MarkRead(_) => EventName::MARK_READ,
            Self::Typing(_) => EventName::TYPING,
        }
    }
}

fn payload<T: DeserializeOwned>(name: &str, data: Value) -> Result<T, GatewayError> {
    serde_json::from_value(data)
        .map_err(|e| GatewayError::InvalidPayload(format!("Invalid {name} payload: {e}")))
}

// ---------------------------------------------------------------------------
// Outbound event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub connection_id: String,
    pub user_id: String,
    pub rooms: Vec<String>,
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: String,
    pub room_id: String,
}

/// Payload of `messages_read` and `user_typing`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUserPayload {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// An event produced by the engine for one or more connections.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Ready(ReadyPayload),
    NewMessage(MessageWithSender),
    MessageDeleted(MessageDeletedPayload),
    MessagesRead(RoomUserPayload),
    UserTyping(RoomUserPayload),
    UserOffline(UserPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => EventName::READY,
            Self::NewMessage(_) => EventName::NEW_MESSAGE,
            Self::MessageDeleted(_) => EventName::MESSAGE_DELETED,
            Self::MessagesRead(_) => EventName::MESSAGES_READ,
            Self::UserTyping(_) => EventName::USER_TYPING,
            Self::UserOffline(_) => EventName::USER_OFFLINE,
            Self::Error(_) => EventName::ERROR,
        }
    }

    /// Serialize once so a broadcast shares a single payload across subscribers.
    pub fn into_dispatch(self) -> Arc<Dispatch> {
        let event_name = self.name();
        let data = match &self {
            Self::Ready(p) => serde_json::to_value(p),
            Self::NewMessage(p) => serde_json::to_value(p),
            Self::MessageDeleted(p) => serde_json::to_value(p),
            Self::MessagesRead(p) | Self::UserTyping(p) => serde_json::to_value(p),
            Self::UserOffline(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
        }
        .unwrap_or_default();
        Arc::new(Dispatch { event_name, data })
    }
}

/// A serialized outbound event, queued on each target connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub event_name: &'static str,
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub struct EventName;

impl EventName {
    // Client → server
    pub const SEND_MESSAGE: &'static str = "send_message";
    pub const DELETE_MESSAGE: &'static str = "delete_message";
    pub const JOIN_ROOM: &'static str = "join_room";
    pub const MARK_READ: &'static str = "mark_read";
    pub const TYPING: &'static str = "typing";

    // Server → client
    pub const READY: &'static str = "ready";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const MESSAGE_DELETED: &'static str = "message_deleted";
    pub const MESSAGES_READ: &'static str = "messages_read";
    pub const USER_TYPING: &'static str = "user_typing";
    pub const USER_OFFLINE: &'static str = "user_offline";
    pub const ERROR: &'static str = "error";
}
