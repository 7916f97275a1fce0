//! The message store.
//!
//! A conversation is never stored: it is the set of messages whose
//! (sender, receiver) pair matches two users in either direction.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};

use duet_shared::models::has_content;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Message, MessageId, NewMessage, StoredMessage, UserId};
use crate::row::{ts_from_sql, ts_to_sql, uuid_from_sql};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, text, image, image_public_id, created_at, seen";

impl Database {
    /// Create a message on behalf of `new.sender_id`.
    ///
    /// Assigns the id and creation time. Text is trimmed; a message with
    /// blank text and no image is rejected with [`StoreError::EmptyMessage`].
    pub fn create_message(&self, new: NewMessage) -> Result<StoredMessage> {
        let text = new.text.trim().to_string();
        let (image, image_public_id) = match new.image {
            Some(img) => (Some(img.url), Some(img.public_id)),
            None => (None, None),
        };

        let stored = StoredMessage {
            message: Message {
                id: MessageId::new(),
                sender_id: new.sender_id,
                receiver_id: new.receiver_id,
                text,
                image,
                // Stored with microsecond precision; truncate so the returned
                // value equals what a later read yields.
                created_at: Utc::now().trunc_subsecs(6),
                seen: false,
            },
            image_public_id,
        };

        self.insert_message(&stored)?;

        tracing::debug!(
            msg_id = %stored.message.id,
            sender = %stored.message.sender_id,
            receiver = %stored.message.receiver_id,
            has_image = stored.message.image.is_some(),
            "message created"
        );

        Ok(stored)
    }

    /// Insert a fully formed message, keeping its id and timestamp.
    pub fn insert_message(&self, stored: &StoredMessage) -> Result<()> {
        let m = &stored.message;
        if !has_content(&m.text, m.image.as_deref()) {
            return Err(StoreError::EmptyMessage);
        }

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, image_public_id, created_at, seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                m.id.to_string(),
                m.sender_id.to_string(),
                m.receiver_id.to_string(),
                m.text,
                m.image,
                stored.image_public_id,
                ts_to_sql(&m.created_at),
                m.seen as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_stored,
            )
            .map_err(not_found)
    }

    /// All messages exchanged between `a` and `b`, oldest first.
    ///
    /// With `since`, only messages created strictly after it are returned.
    pub fn list_conversation(
        &self,
        a: UserId,
        b: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let since = since.map(|ts| ts_to_sql(&ts));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
               AND (?3 IS NULL OR created_at > ?3)
             ORDER BY created_at ASC, seq ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string(), since], |row| {
            row_to_stored(row).map(|s| s.message)
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip `seen` on the given messages.
    ///
    /// Returns how many rows actually changed; ids that are already seen or
    /// unknown are skipped without error.
    pub fn mark_seen(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn().unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE messages SET seen = 1 WHERE id = ?1 AND seen = 0")?;
            for id in ids {
                updated += stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Mark every unseen message from `sender` to `receiver` as seen.
    ///
    /// Returns the ids that changed, oldest first.
    pub fn mark_conversation_seen(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<Vec<MessageId>> {
        let tx = self.conn().unchecked_transaction()?;

        let ids = {
            let mut stmt = tx.prepare(
                "SELECT id FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0
                 ORDER BY created_at ASC, seq ASC",
            )?;
            let rows = stmt.query_map(params![sender.to_string(), receiver.to_string()], |row| {
                let id: String = row.get(0)?;
                uuid_from_sql(0, &id).map(MessageId)
            })?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        if !ids.is_empty() {
            tx.execute(
                "UPDATE messages SET seen = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                params![sender.to_string(), receiver.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(ids)
    }

    /// Most recent message of every conversation `user` takes part in,
    /// keyed by the other participant.
    ///
    /// Computed by one windowed query so all conversations are read from the
    /// same snapshot.
    pub fn last_message_per_counterpart(&self, user: UserId) -> Result<HashMap<UserId, Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}, counterpart FROM (
                 SELECT {MESSAGE_COLUMNS},
                        CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS counterpart,
                        ROW_NUMBER() OVER (
                            PARTITION BY CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                            ORDER BY created_at DESC, seq DESC
                        ) AS rn
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
             )
             WHERE rn = 1"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let stored = row_to_stored(row)?;
            let counterpart: String = row.get(8)?;
            Ok((UserId(uuid_from_sql(8, &counterpart)?), stored.message))
        })?;

        let mut last = HashMap::new();
        for row in rows {
            let (counterpart, message) = row?;
            last.insert(counterpart, message);
        }
        Ok(last)
    }

    /// Most recent message between `a` and `b`, if any.
    pub fn last_message_between(&self, a: UserId, b: UserId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY created_at DESC, seq DESC
                     LIMIT 1"
                ),
                params![a.to_string(), b.to_string()],
                row_to_stored,
            )
            .optional()?;
        Ok(message.map(|s| s.message))
    }

    /// Delete a message. Only its sender may do so.
    ///
    /// Returns the deleted record so the caller can clean up the attached
    /// image. The store is left untouched on failure.
    pub fn delete_message(&self, id: MessageId, requestor: UserId) -> Result<StoredMessage> {
        let tx = self.conn().unchecked_transaction()?;

        let stored = tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_stored,
            )
            .map_err(not_found)?;

        if stored.message.sender_id != requestor {
            return Err(StoreError::NotSender);
        }

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        Ok(stored)
    }

    /// Number of unseen messages from `sender` to `receiver`.
    pub fn count_unseen(&self, sender: UserId, receiver: UserId) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
            params![sender.to_string(), receiver.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Unseen counts for every sender that has unread messages for
    /// `receiver`, in one grouped query.
    pub fn unseen_counts_for(&self, receiver: UserId) -> Result<HashMap<UserId, u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND seen = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![receiver.to_string()], |row| {
            let sender: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((UserId(uuid_from_sql(0, &sender)?), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let text: String = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let image_public_id: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;
    let seen_int: i32 = row.get(7)?;

    Ok(StoredMessage {
        message: Message {
            id: MessageId(uuid_from_sql(0, &id_str)?),
            sender_id: UserId(uuid_from_sql(1, &sender_str)?),
            receiver_id: UserId(uuid_from_sql(2, &receiver_str)?),
            text,
            image,
            created_at: ts_from_sql(6, &created_str)?,
            seen: seen_int != 0,
        },
        image_public_id,
    })
}
