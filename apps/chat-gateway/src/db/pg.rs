//! PostgreSQL-backed [`ChatStore`] using diesel-async.

use async_trait::async_trait;
use chat_common::PrefixedId;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel_async::RunQueryDsl;

use crate::error::StoreError;
use crate::models::member::Member;
use crate::models::message::{Message, MessageRow, MessageWithSender, NewMessage, NewMessageRow};
use crate::models::user::{Presence, Sender, User};

use super::pool::DbPool;
use super::schema::{messages, room_members, users};
use super::store::ChatStore;

#[derive(Clone)]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_message(&self, new: NewMessage) -> Result<MessageWithSender, StoreError> {
        let mut conn = self.pool.get().await?;

        let user: User = users::table
            .find(&new.sender_id)
            .select(User::as_select())
            .get_result(&mut conn)
            .await?;

        let id = Message::generate();
        let now = Utc::now();

        let row: MessageRow = diesel::insert_into(messages::table)
            .values(NewMessageRow {
                id: &id,
                room_id: &new.room_id,
                sender_id: &new.sender_id,
                content: &new.content,
                type_: new.kind.as_str(),
                is_read: false,
                is_edited: false,
                created_at: now,
                updated_at: now,
            })
            .returning(MessageRow::as_returning())
            .get_result(&mut conn)
            .await?;

        Ok(MessageWithSender {
            message: row.try_into()?,
            sender: Sender::from(&user),
        })
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row: Option<MessageRow> = messages::table
            .find(message_id)
            .select(MessageRow::as_select())
            .get_result(&mut conn)
            .await
            .optional()?;

        row.map(Message::try_from).transpose()
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let deleted = diesel::delete(messages::table.find(message_id))
            .execute(&mut conn)
            .await?;

        Ok(deleted > 0)
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<MessageRow> = messages::table
            .filter(messages::room_id.eq(room_id))
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .select(MessageRow::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter().rev().map(Message::try_from).collect()
    }

    async fn rooms_of(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rooms: Vec<String> = room_members::table
            .filter(room_members::user_id.eq(user_id))
            .order(room_members::room_id.asc())
            .select(room_members::room_id)
            .load(&mut conn)
            .await?;

        Ok(rooms)
    }

    async fn members_of(&self, room_id: &str) -> Result<Vec<Member>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(String, String, Option<String>)> = room_members::table
            .inner_join(users::table)
            .filter(room_members::room_id.eq(room_id))
            .order(room_members::joined_at.asc())
            .select((users::id, users::username, users::push_token))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, username, push_token)| Member {
                user_id,
                username,
                push_token,
            })
            .collect())
    }

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let exists: bool = diesel::select(diesel::dsl::exists(
            room_members::table
                .filter(room_members::room_id.eq(room_id))
                .filter(room_members::user_id.eq(user_id)),
        ))
        .get_result(&mut conn)
        .await?;

        Ok(exists)
    }

    async fn set_presence(
        &self,
        user_id: &str,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;

        let target = users::table.find(user_id);
        match last_seen {
            Some(last_seen) => {
                diesel::update(target)
                    .set((users::is_online.eq(online), users::last_seen_at.eq(last_seen)))
                    .execute(&mut conn)
                    .await?
            }
            None => {
                diesel::update(target)
                    .set(users::is_online.eq(online))
                    .execute(&mut conn)
                    .await?
            }
        };

        Ok(())
    }

    async fn presence_of(&self, user_id: &str) -> Result<Option<Presence>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row: Option<(bool, DateTime<Utc>)> = users::table
            .find(user_id)
            .select((users::is_online, users::last_seen_at))
            .get_result(&mut conn)
            .await
            .optional()?;

        Ok(row.map(|(online, last_seen)| Presence { online, last_seen }))
    }

    async fn bulk_mark_read(&self, room_id: &str, reader_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            messages::table
                .filter(messages::room_id.eq(room_id))
                .filter(messages::sender_id.ne(reader_id))
                .filter(messages::is_read.eq(false)),
        )
        .set((messages::is_read.eq(true), messages::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;

        Ok(updated)
    }
}
