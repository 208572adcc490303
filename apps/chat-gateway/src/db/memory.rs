use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chat_common::PrefixedId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::member::Member;
use crate::models::message::{Message, MessageWithSender, NewMessage};
use crate::models::user::{Presence, Sender, User};

use super::store::ChatStore;

// ---------------------------------------------------------------------------
// In-memory implementation (for local runs / tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    /// Room id -> member user ids, in join order.
    members: HashMap<String, Vec<String>>,
    /// All messages in creation order.
    messages: Vec<Message>,
}

/// A [`ChatStore`] held entirely in process memory.
///
/// Lost on restart. `set_failing(true)` makes every operation return
/// [`StoreError::Unavailable`], which tests use to exercise abort paths.
pub struct MemoryChatStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            failing: AtomicBool::new(false),
        }
    }

    /// Create or replace a user record.
    pub fn add_user(&self, user_id: &str, username: &str, push_token: Option<&str>) {
        let now = Utc::now();
        self.state.lock().users.insert(
            user_id.to_string(),
            User {
                id: user_id.to_string(),
                username: username.to_string(),
                avatar_url: None,
                push_token: push_token.map(str::to_string),
                is_online: false,
                last_seen_at: now,
                created_at: now,
            },
        );
    }

    /// Add a user to a room's persisted member set. Adding twice is a no-op.
    pub fn add_member(&self, room_id: &str, user_id: &str) {
        let mut state = self.state.lock();
        let members = state.members.entry(room_id.to_string()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_message(&self, new: NewMessage) -> Result<MessageWithSender, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let sender = state
            .users
            .get(&new.sender_id)
            .map(Sender::from)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown sender {}", new.sender_id)))?;

        let now = Utc::now();
        let message = Message {
            id: Message::generate(),
            room_id: new.room_id,
            sender_id: new.sender_id,
            content: new.content,
            kind: new.kind,
            is_read: false,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        state.messages.push(message.clone());

        Ok(MessageWithSender { message, sender })
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let before = state.messages.len();
        state.messages.retain(|m| m.id != message_id);
        Ok(state.messages.len() != before)
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        let in_room: Vec<&Message> = state.messages.iter().filter(|m| m.room_id == room_id).collect();
        let skip = in_room.len().saturating_sub(limit);
        Ok(in_room.into_iter().skip(skip).cloned().collect())
    }

    async fn rooms_of(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        let mut rooms: Vec<String> = state
            .members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == user_id))
            .map(|(room_id, _)| room_id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn members_of(&self, room_id: &str) -> Result<Vec<Member>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        let Some(member_ids) = state.members.get(room_id) else {
            return Ok(Vec::new());
        };
        Ok(member_ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .map(|user| Member {
                user_id: user.id.clone(),
                username: user.username.clone(),
                push_token: user.push_token.clone(),
            })
            .collect())
    }

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .members
            .get(room_id)
            .is_some_and(|members| members.iter().any(|m| m == user_id)))
    }

    async fn set_presence(
        &self,
        user_id: &str,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        if let Some(user) = state.users.get_mut(user_id) {
            user.is_online = online;
            if let Some(last_seen) = last_seen {
                user.last_seen_at = last_seen;
            }
        }
        Ok(())
    }

    async fn presence_of(&self, user_id: &str) -> Result<Option<Presence>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.users.get(user_id).map(|u| Presence {
            online: u.is_online,
            last_seen: u.last_seen_at,
        }))
    }

    async fn bulk_mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut updated = 0;
        for msg in state
            .messages
            .iter_mut()
            .filter(|m| m.room_id == room_id && m.sender_id != reader_id && !m.is_read)
        {
            msg.is_read = true;
            msg.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }
}
