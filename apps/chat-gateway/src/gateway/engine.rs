//! Event engine: admits connections, applies inbound events, tears down.
//!
//! Every event runs persistence first and touches the router only after the
//! store call has returned, so no lock is ever held across I/O.

use std::sync::Arc;

use chrono::Utc;

use crate::db::store::ChatStore;
use crate::error::GatewayError;
use crate::models::message::NewMessage;
use crate::push::{PushJob, PushQueue};

use super::connection::{OutboundSender, SessionHandle};
use super::events::{
    ClientEvent, DeleteMessagePayload, ErrorPayload, MessageDeletedPayload, RoomPayload,
    RoomUserPayload, SendMessagePayload, ServerEvent, UserPayload,
};
use super::registry::SessionRegistry;
use super::router::RoomRouter;

/// Heartbeat interval sent to clients in the READY payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 41250;

/// Longest accepted message body, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

const NO_ACCESS: &str = "No access to this chat";

pub struct EventEngine {
    store: Arc<dyn ChatStore>,
    sessions: SessionRegistry,
    router: RoomRouter,
    push: PushQueue,
}

impl EventEngine {
    pub fn new(store: Arc<dyn ChatStore>, push: PushQueue) -> Self {
        Self {
            sessions: SessionRegistry::new(store.clone()),
            router: RoomRouter::new(),
            store,
            push,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    /// Admit an authenticated user: register the connection (which queues
    /// READY), mark the user online, and subscribe it to its rooms.
    pub async fn connect(&self, user_id: &str, tx: OutboundSender) -> Result<SessionHandle, GatewayError> {
        let (conn, rooms) = self.sessions.register(user_id, tx).await?;

        if let Err(err) = self.store.set_presence(user_id, true, None).await {
            tracing::warn!(%user_id, error = %err, "failed to mark user online");
        }

        for room_id in &rooms {
            self.router.subscribe(room_id, &conn);
        }

        tracing::info!(
            connection_id = %conn.id,
            %user_id,
            rooms = conn.rooms().len(),
            "gateway connection established"
        );
        Ok(conn)
    }

    /// Apply one inbound event. Events from the same connection are
    /// processed one at a time, in arrival order.
    pub async fn handle(&self, conn: &SessionHandle, event: ClientEvent) {
        let _gate = conn.lock_events().await;
        if conn.is_closed() {
            return;
        }

        let name = event.name();
        let result = match event {
            ClientEvent::SendMessage(p) => self.send_message(conn, p).await,
            ClientEvent::DeleteMessage(p) => self.delete_message(conn, p).await,
            ClientEvent::JoinRoom(p) => self.join_room(conn, p).await,
            ClientEvent::MarkRead(p) => self.mark_read(conn, p).await,
            ClientEvent::Typing(p) => self.typing(conn, p),
        };

        if let Err(err) = result {
            self.reject(conn, name, err);
        }
    }

    /// Report a failed event back to its connection, or drop it silently.
    pub fn reject(&self, conn: &SessionHandle, event: &str, err: GatewayError) {
        match &err {
            GatewayError::TransientStoreFailure { source, .. } => {
                tracing::error!(connection_id = %conn.id, event, error = %source, "{err}");
            }
            _ => {
                tracing::debug!(connection_id = %conn.id, event, error = %err, "event rejected");
            }
        }

        if let Some(message) = err.client_message() {
            self.router
                .send_to(conn, ServerEvent::Error(ErrorPayload { message }).into_dispatch());
        }
    }

    /// Tear a connection down. Only the first call for a connection does
    /// anything; later calls return `false`.
    pub async fn disconnect(&self, conn: &SessionHandle) -> bool {
        if !self.sessions.deregister(conn) {
            return false;
        }
        // Let an in-flight event finish before the user goes offline.
        drop(conn.lock_events().await);

        let rooms = self.router.unsubscribe_all(conn);

        if let Err(err) = self
            .store
            .set_presence(&conn.user_id, false, Some(Utc::now()))
            .await
        {
            tracing::warn!(user_id = %conn.user_id, error = %err, "failed to mark user offline");
        }

        let offline = ServerEvent::UserOffline(UserPayload {
            user_id: conn.user_id.clone(),
        });
        let notified = self.sessions.broadcast_all(offline.into_dispatch(), Some(&conn.id));

        tracing::info!(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            rooms,
            notified,
            "gateway connection closed"
        );
        true
    }

    async fn send_message(&self, conn: &SessionHandle, p: SendMessagePayload) -> Result<(), GatewayError> {
        let content = validate_content(&p.content)?;
        if !conn.is_subscribed(&p.room_id) {
            return Err(GatewayError::AccessDenied(NO_ACCESS.to_string()));
        }

        let created = self
            .store
            .create_message(NewMessage {
                room_id: p.room_id.clone(),
                sender_id: conn.user_id.clone(),
                content: content.to_string(),
                kind: p.kind,
            })
            .await
            .map_err(GatewayError::store("Failed to send message"))?;

        let job = self.push.is_enabled().then(|| PushJob {
            room_id: created.message.room_id.clone(),
            message_id: created.message.id.clone(),
            sender_id: created.message.sender_id.clone(),
            sender_name: created.sender.username.clone(),
            content: created.message.content.clone(),
        });

        let message_id = created.message.id.clone();
        let delivered = self
            .router
            .broadcast(&p.room_id, ServerEvent::NewMessage(created).into_dispatch(), None);
        tracing::debug!(room_id = %p.room_id, %message_id, delivered, "message broadcast");

        if let Some(job) = job {
            self.push.enqueue(job);
        }
        Ok(())
    }

    async fn delete_message(&self, conn: &SessionHandle, p: DeleteMessagePayload) -> Result<(), GatewayError> {
        let message = self
            .store
            .find_message(&p.message_id)
            .await
            .map_err(GatewayError::store("Failed to delete message"))?
            .ok_or(GatewayError::NotFound("message"))?;

        if message.sender_id != conn.user_id {
            return Err(GatewayError::Unauthorized(format!(
                "{} does not own {}",
                conn.user_id, message.id
            )));
        }
        if message.room_id != p.room_id {
            return Err(GatewayError::NotFound("message"));
        }

        let deleted = self
            .store
            .delete_message(&message.id)
            .await
            .map_err(GatewayError::store("Failed to delete message"))?;
        if !deleted {
            // Removed concurrently; the other delete already broadcast.
            return Err(GatewayError::NotFound("message"));
        }

        let event = ServerEvent::MessageDeleted(MessageDeletedPayload {
            message_id: message.id,
            room_id: message.room_id.clone(),
        });
        self.router.broadcast(&message.room_id, event.into_dispatch(), None);
        Ok(())
    }

    async fn join_room(&self, conn: &SessionHandle, p: RoomPayload) -> Result<(), GatewayError> {
        let member = self
            .store
            .is_member(&p.room_id, &conn.user_id)
            .await
            .map_err(GatewayError::store("Failed to join chat"))?;
        if !member {
            return Err(GatewayError::AccessDenied(NO_ACCESS.to_string()));
        }

        if self.router.subscribe(&p.room_id, conn) {
            tracing::debug!(connection_id = %conn.id, room_id = %p.room_id, "joined room");
        }
        Ok(())
    }

    async fn mark_read(&self, conn: &SessionHandle, p: RoomPayload) -> Result<(), GatewayError> {
        let member = self
            .store
            .is_member(&p.room_id, &conn.user_id)
            .await
            .map_err(GatewayError::store("Failed to mark messages as read"))?;
        if !member {
            return Err(GatewayError::AccessDenied(NO_ACCESS.to_string()));
        }

        let updated = self
            .store
            .bulk_mark_read(&p.room_id, &conn.user_id)
            .await
            .map_err(GatewayError::store("Failed to mark messages as read"))?;
        tracing::debug!(room_id = %p.room_id, user_id = %conn.user_id, updated, "messages marked read");

        let event = ServerEvent::MessagesRead(RoomUserPayload {
            room_id: p.room_id.clone(),
            user_id: conn.user_id.clone(),
        });
        self.router.broadcast(&p.room_id, event.into_dispatch(), None);
        Ok(())
    }

    fn typing(&self, conn: &SessionHandle, p: RoomPayload) -> Result<(), GatewayError> {
        if !conn.is_subscribed(&p.room_id) {
            return Ok(());
        }
        let event = ServerEvent::UserTyping(RoomUserPayload {
            room_id: p.room_id.clone(),
            user_id: conn.user_id.clone(),
        });
        self.router.broadcast(&p.room_id, event.into_dispatch(), Some(&conn.id));
        Ok(())
    }
}

fn validate_content(content: &str) -> Result<&str, GatewayError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidPayload(
            "Message content cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(GatewayError::InvalidPayload(format!(
            "Message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(trimmed)
}
