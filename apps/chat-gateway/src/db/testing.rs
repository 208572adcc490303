//! Store wrappers for exercising interleavings in tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use crate::error::StoreError;
use crate::models::member::Member;
use crate::models::message::{Message, MessageWithSender, NewMessage};
use crate::models::user::Presence;

use super::memory::MemoryChatStore;
use super::store::ChatStore;

/// Delegates to a [`MemoryChatStore`], but parks calls named by [`hold`]
/// until [`release`] is called. Each parked call reports its name on the
/// `entered` channel first, so a test knows exactly when an operation is
/// suspended mid-I/O.
///
/// Gate names: `create_message`, `rooms_of`, `set_presence_online`,
/// `set_presence_offline`.
///
/// [`hold`]: GatedStore::hold
/// [`release`]: GatedStore::release
pub struct GatedStore {
    inner: Arc<MemoryChatStore>,
    held: Mutex<HashSet<&'static str>>,
    gate: Semaphore,
    entered: mpsc::UnboundedSender<&'static str>,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryChatStore>) -> (Self, mpsc::UnboundedReceiver<&'static str>) {
        let (entered, rx) = mpsc::unbounded_channel();
        let store = Self {
            inner,
            held: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
            entered,
        };
        (store, rx)
    }

    pub fn hold(&self, name: &'static str) {
        self.held.lock().insert(name);
    }

    /// Let every parked and future call through.
    pub fn release(&self) {
        self.held.lock().clear();
        self.gate.close();
    }

    async fn pass(&self, name: &'static str) {
        if !self.held.lock().contains(name) {
            return;
        }
        let _ = self.entered.send(name);
        // Closing the semaphore wakes every waiter with an error.
        let _ = self.gate.acquire().await;
    }
}

#[async_trait]
impl ChatStore for GatedStore {
    async fn create_message(&self, new: NewMessage) -> Result<MessageWithSender, StoreError> {
        self.pass("create_message").await;
        self.inner.create_message(new).await
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        self.inner.find_message(message_id).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError> {
        self.inner.delete_message(message_id).await
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages(room_id, limit).await
    }

    async fn rooms_of(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.pass("rooms_of").await;
        self.inner.rooms_of(user_id).await
    }

    async fn members_of(&self, room_id: &str) -> Result<Vec<Member>, StoreError> {
        self.inner.members_of(room_id).await
    }

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.inner.is_member(room_id, user_id).await
    }

    async fn set_presence(
        &self,
        user_id: &str,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let name = if online {
            "set_presence_online"
        } else {
            "set_presence_offline"
        };
        self.pass(name).await;
        self.inner.set_presence(user_id, online, last_seen).await
    }

    async fn presence_of(&self, user_id: &str) -> Result<Option<Presence>, StoreError> {
        self.inner.presence_of(user_id).await
    }

    async fn bulk_mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize, StoreError> {
        self.inner.bulk_mark_read(room_id, reader_id).await
    }
}
