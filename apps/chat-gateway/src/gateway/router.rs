//! Room-scoped fan-out of gateway events.
//!
//! Each room maps to the set of connections subscribed to it. Broadcasts
//! snapshot the set under the shard lock and queue events after releasing
//! it, so a slow connection never blocks the room or its neighbours.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::connection::SessionHandle;
use super::events::Dispatch;

#[derive(Default)]
pub struct RoomRouter {
    rooms: DashMap<String, HashMap<String, SessionHandle>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a room. Returns `true` if it was not
    /// already subscribed. Closed connections are never subscribed.
    pub fn subscribe(&self, room_id: &str, conn: &SessionHandle) -> bool {
        if conn.is_closed() {
            return false;
        }

        let inserted = {
            let mut subscribers = self.rooms.entry(room_id.to_string()).or_default();
            subscribers.insert(conn.id.clone(), conn.clone()).is_none()
        };
        conn.track_room(room_id);

        // Lost a race with disconnect: undo so nothing lingers in the room.
        if conn.is_closed() {
            conn.untrack_room(room_id);
            self.remove(room_id, &conn.id);
            return false;
        }
        inserted
    }

    /// Remove a connection from one room.
    pub fn unsubscribe(&self, room_id: &str, conn: &SessionHandle) -> bool {
        conn.untrack_room(room_id);
        self.remove(room_id, &conn.id)
    }

    /// Remove a connection from every room it is subscribed to. Returns the
    /// number of rooms left.
    pub fn unsubscribe_all(&self, conn: &SessionHandle) -> usize {
        let rooms = conn.take_rooms();
        for room_id in &rooms {
            self.remove(room_id, &conn.id);
        }
        rooms.len()
    }

    fn remove(&self, room_id: &str, connection_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut subscribers) => subscribers.remove(connection_id).is_some(),
            None => false,
        };
        self.rooms.remove_if(room_id, |_, subscribers| subscribers.is_empty());
        removed
    }

    /// Queue an event on every subscriber of a room except `exclude`.
    /// Returns the number of connections targeted.
    pub fn broadcast(&self, room_id: &str, dispatch: Arc<Dispatch>, exclude: Option<&str>) -> usize {
        let targets: Vec<SessionHandle> = match self.rooms.get(room_id) {
            Some(subscribers) => subscribers
                .values()
                .filter(|c| Some(c.id.as_str()) != exclude)
                .cloned()
                .collect(),
            None => return 0,
        };

        for conn in &targets {
            conn.send(dispatch.clone());
        }
        targets.len()
    }

    /// Queue an event on a single connection. Dropped if it has closed.
    pub fn send_to(&self, conn: &SessionHandle, dispatch: Arc<Dispatch>) -> bool {
        conn.send(dispatch)
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |s| s.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
