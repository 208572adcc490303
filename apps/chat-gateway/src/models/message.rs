use chrono::{DateTime, Utc};
use chat_common::id::prefix;
use chat_common::PrefixedId;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema::messages;
use crate::error::StoreError;

use super::user::Sender;

/// Content kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// A persisted chat message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub is_read: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrefixedId for Message {
    const PREFIX: &'static str = prefix::MESSAGE;
}

/// Payload of a `new_message` event: the message plus its sender's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Sender,
}

/// Input to [`ChatStore::create_message`](crate::db::store::ChatStore::create_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub type_: String,
    pub is_read: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let kind = MessageKind::parse(&row.type_)
            .ok_or_else(|| StoreError::Corrupt(format!("message {} has type {}", row.id, row.type_)))?;
        Ok(Self {
            id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            content: row.content,
            kind,
            is_read: row.is_read,
            is_edited: row.is_edited,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub room_id: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub type_: &'a str,
    pub is_read: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_camel_case_with_type_field() {
        let now = Utc::now();
        let msg = MessageWithSender {
            message: Message {
                id: "msg_1".into(),
                room_id: "room_1".into(),
                sender_id: "usr_a".into(),
                content: "hi".into(),
                kind: MessageKind::Image,
                is_read: false,
                is_edited: false,
                created_at: now,
                updated_at: now,
            },
            sender: Sender {
                id: "usr_a".into(),
                username: "alice".into(),
                avatar_url: None,
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["roomId"], "room_1");
        assert_eq!(json["senderId"], "usr_a");
        assert_eq!(json["type"], "image");
        assert_eq!(json["isRead"], false);
        assert_eq!(json["sender"]["username"], "alice");
    }

    #[test]
    fn row_with_unknown_type_is_corrupt() {
        let now = Utc::now();
        let row = MessageRow {
            id: "msg_1".into(),
            room_id: "room_1".into(),
            sender_id: "usr_a".into(),
            content: "hi".into(),
            type_: "sticker".into(),
            is_read: false,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(Message::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
