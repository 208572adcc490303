//! Registry of live gateway connections.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::db::store::ChatStore;
use crate::error::GatewayError;

use super::connection::{Connection, OutboundSender, SessionHandle};
use super::engine::HEARTBEAT_INTERVAL_MS;
use super::events::{Dispatch, ReadyPayload, ServerEvent};

/// Shared registry of all live connections.
///
/// Uses `DashMap` for shard-level concurrency. A user may hold several
/// connections at once; each is tracked independently.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    store: Arc<dyn ChatStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
        }
    }

    /// Create a connection for an authenticated user and load the rooms it
    /// should be subscribed to.
    ///
    /// READY is queued before the connection is visible to any broadcast,
    /// so it is always the first event the client sees. Nothing is
    /// registered if the membership lookup fails.
    pub async fn register(
        &self,
        user_id: &str,
        tx: OutboundSender,
    ) -> Result<(SessionHandle, Vec<String>), GatewayError> {
        if user_id.trim().is_empty() {
            return Err(GatewayError::AuthRejected("Missing user identity".to_string()));
        }

        let rooms = self
            .store
            .rooms_of(user_id)
            .await
            .map_err(GatewayError::store("Failed to load chats"))?;

        let handle = Arc::new(Connection::new(user_id.to_string(), tx));
        let ready = ServerEvent::Ready(ReadyPayload {
            connection_id: handle.id.clone(),
            user_id: handle.user_id.clone(),
            rooms: rooms.clone(),
            heartbeat_interval: HEARTBEAT_INTERVAL_MS,
        });
        handle.send(ready.into_dispatch());
        self.sessions.insert(handle.id.clone(), handle.clone());

        tracing::debug!(
            connection_id = %handle.id,
            %user_id,
            rooms = rooms.len(),
            "connection registered"
        );

        Ok((handle, rooms))
    }

    /// Close and remove a connection. Returns `true` only the first time.
    pub fn deregister(&self, handle: &SessionHandle) -> bool {
        if !handle.mark_closed() {
            return false;
        }
        self.sessions.remove(&handle.id);
        true
    }

    pub fn rooms_of(&self, handle: &SessionHandle) -> HashSet<String> {
        handle.rooms()
    }

    pub fn get(&self, connection_id: &str) -> Option<SessionHandle> {
        self.sessions.get(connection_id).map(|e| e.value().clone())
    }

    /// All live connections belonging to a user.
    pub fn connections_of(&self, user_id: &str) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue an event on every live connection except `exclude`.
    /// Returns the number of connections targeted.
    pub fn broadcast_all(&self, dispatch: Arc<Dispatch>, exclude: Option<&str>) -> usize {
        let targets: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|e| Some(e.key().as_str()) != exclude)
            .map(|e| e.value().clone())
            .collect();

        for conn in &targets {
            conn.send(dispatch.clone());
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryChatStore;
    use crate::gateway::events::{ServerEvent, UserPayload};
    use tokio::sync::mpsc;

    fn store() -> Arc<MemoryChatStore> {
        let store = Arc::new(MemoryChatStore::new());
        store.add_user("usr_a", "alice", None);
        store.add_user("usr_b", "bob", None);
        store.add_member("r1", "usr_a");
        store.add_member("r2", "usr_a");
        store.add_member("r1", "usr_b");
        store
    }

    #[tokio::test]
    async fn register_loads_rooms_and_queues_ready() {
        let registry = SessionRegistry::new(store());
        let (tx, mut rx) = mpsc::channel(8);

        let (handle, rooms) = registry.register("usr_a", tx).await.unwrap();
        assert_eq!(rooms, vec!["r1", "r2"]);
        assert_eq!(handle.user_id, "usr_a");
        assert!(registry.get(&handle.id).is_some());
        assert_eq!(registry.len(), 1);

        let ready = rx.try_recv().unwrap();
        assert_eq!(ready.event_name, "ready");
        assert_eq!(ready.data["connectionId"], handle.id.as_str());
        assert_eq!(ready.data["rooms"], serde_json::json!(["r1", "r2"]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_rejects_empty_principal() {
        let registry = SessionRegistry::new(store());
        let (tx, _rx) = mpsc::channel(8);
        let result = registry.register("  ", tx).await;
        assert!(matches!(result, Err(GatewayError::AuthRejected(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn register_fails_without_side_effects_when_store_is_down() {
        let store = store();
        store.set_failing(true);
        let registry = SessionRegistry::new(store);
        let (tx, _rx) = mpsc::channel(8);

        let result = registry.register("usr_a", tx).await;
        assert!(matches!(result, Err(GatewayError::TransientStoreFailure { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = SessionRegistry::new(store());
        let (tx, _rx) = mpsc::channel(8);
        let (handle, _) = registry.register("usr_a", tx).await.unwrap();

        assert!(registry.deregister(&handle));
        assert!(!registry.deregister(&handle));
        assert!(registry.is_empty());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn same_user_gets_independent_connections() {
        let registry = SessionRegistry::new(store());
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let (a1, _) = registry.register("usr_a", tx1).await.unwrap();
        let (a2, _) = registry.register("usr_a", tx2).await.unwrap();

        assert_ne!(a1.id, a2.id);
        assert_eq!(registry.connections_of("usr_a").len(), 2);

        registry.deregister(&a1);
        assert_eq!(registry.connections_of("usr_a").len(), 1);
    }

    #[tokio::test]
    async fn broadcast_all_skips_excluded_connection() {
        let registry = SessionRegistry::new(store());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (a, _) = registry.register("usr_a", tx_a).await.unwrap();
        registry.register("usr_b", tx_b).await.unwrap();
        assert_eq!(rx_a.try_recv().unwrap().event_name, "ready");
        assert_eq!(rx_b.try_recv().unwrap().event_name, "ready");

        let event = ServerEvent::UserOffline(UserPayload {
            user_id: "usr_a".into(),
        })
        .into_dispatch();
        assert_eq!(registry.broadcast_all(event, Some(&a.id)), 1);

        assert_eq!(rx_b.try_recv().unwrap().event_name, "user_offline");
        assert!(rx_a.try_recv().is_err());
    }
}
