//! The persistence gateway consumed by the event engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::member::Member;
use crate::models::message::{Message, MessageWithSender, NewMessage};
use crate::models::user::Presence;

/// Typed operations over users, rooms, memberships and messages.
///
/// Implementations carry no business logic: ownership and membership policy
/// is decided by the caller. Every method may suspend on I/O, so callers must
/// not hold in-memory routing locks across them.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a new message and return it with its sender's profile.
    async fn create_message(&self, new: NewMessage) -> Result<MessageWithSender, StoreError>;

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError>;

    /// Delete a message. Returns `false` if it did not exist.
    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError>;

    /// The most recent `limit` messages of a room, oldest first.
    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Ids of every room the user is a persisted member of.
    async fn rooms_of(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn members_of(&self, room_id: &str) -> Result<Vec<Member>, StoreError>;

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Record whether the user is online. `last_seen` is written only when
    /// given, so going online leaves the last offline time intact.
    async fn set_presence(
        &self,
        user_id: &str,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn presence_of(&self, user_id: &str) -> Result<Option<Presence>, StoreError>;

    /// Mark every unread message in the room not sent by `reader_id` as read.
    /// Returns the number of messages updated.
    async fn bulk_mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize, StoreError>;
}
