use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::ChatStore;
use crate::error::ChatError;
use crate::models::{LastMessage, Message, from_micros, to_micros, validate_content};

fn message_from_row(r: &SqliteRow) -> Message {
    Message {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        sender_id: r.get("sender_id"),
        content: r.get("content"),
        is_read: r.get("is_read"),
        created_at: from_micros(r.get("created_at")),
    }
}

impl ChatStore {
    /// Persist a message and bump the conversation's last activity in one transaction.
    ///
    /// The conversation row is updated first so that the write lock is taken
    /// before the insert; the message is stamped with the bumped activity time,
    /// which keeps creation timestamps nondecreasing in insertion order.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        text: &str,
    ) -> Result<Message, ChatError> {
        let content = validate_content(text)?;
        let now = to_micros(Utc::now());

        let mut tx = self.pool.begin().await?;

        let stamped: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET last_activity_at = MAX(last_activity_at, ?)
            WHERE id = ? AND (buyer_id = ? OR seller_id = ?)
            RETURNING last_activity_at
            "#,
        )
        .bind(now)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(sender_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Unknown conversation or a sender outside it; dropping `tx` rolls back.
        let Some(created_at) = stamped else {
            return Err(ChatError::NotFound);
        };

        let id = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, sender_id, content, is_read, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id,
            sender_id,
            content: content.to_string(),
            is_read: false,
            created_at: from_micros(created_at),
        })
    }

    /// All messages of a conversation in the order they were persisted.
    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, ChatError> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, content, is_read, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Flip `is_read` on every unread message the reader did not send.
    /// Returns how many rows changed; zero is not an error.
    pub async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<u64, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = 1
            WHERE conversation_id = ? AND is_read = 0 AND sender_id <> ?
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, conversation_id: i64, reader_id: i64) -> Result<i64, ChatError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND is_read = 0 AND sender_id <> ?",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn last_message(&self, conversation_id: i64) -> Result<Option<LastMessage>, ChatError> {
        let row = sqlx::query(
            r#"
            SELECT content, sender_id, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LastMessage {
            content: r.get("content"),
            sender_id: r.get("sender_id"),
            created_at: from_micros(r.get("created_at")),
        }))
    }
}
