//! Per-connection gateway state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chat_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::Dispatch;

/// Sending half of a connection's bounded outbound queue.
pub type OutboundSender = mpsc::Sender<Arc<Dispatch>>;

/// Shared handle to a live connection.
pub type SessionHandle = Arc<Connection>;

/// State for a single authenticated WebSocket connection.
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub id: String,
    /// Authenticated user ID.
    pub user_id: String,
    tx: OutboundSender,
    /// Rooms this connection is currently subscribed to.
    rooms: Mutex<HashSet<String>>,
    closed: AtomicBool,
    seq: AtomicU64,
    /// Held while an inbound event is being processed so events from one
    /// connection never interleave.
    event_gate: tokio::sync::Mutex<()>,
}

impl Connection {
    pub fn new(user_id: String, tx: OutboundSender) -> Self {
        Self {
            id: prefixed_ulid(prefix::CONNECTION),
            user_id,
            tx,
            rooms: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            event_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.rooms.lock().contains(room_id)
    }

    /// Snapshot of the rooms this connection is subscribed to.
    pub fn rooms(&self) -> HashSet<String> {
        self.rooms.lock().clone()
    }

    pub(crate) fn track_room(&self, room_id: &str) -> bool {
        self.rooms.lock().insert(room_id.to_string())
    }

    pub(crate) fn untrack_room(&self, room_id: &str) -> bool {
        self.rooms.lock().remove(room_id)
    }

    pub(crate) fn take_rooms(&self) -> HashSet<String> {
        std::mem::take(&mut *self.rooms.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flip the closed flag. Returns `true` only for the call that closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) async fn lock_events(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.event_gate.lock().await
    }

    /// Queue an event for this connection without waiting.
    ///
    /// Returns `false` if the connection is closed or its queue is full.
    pub fn send(&self, dispatch: Arc<Dispatch>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(dispatch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dispatch)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    user_id = %self.user_id,
                    event = dispatch.event_name,
                    "outbound queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
