use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;

use super::ChatStore;
use crate::error::ChatError;
use crate::models::{
    Conversation, ConversationDetail, ConversationSummary, Listing, MessageView, UserSummary,
    from_micros, to_micros,
};

const CONVERSATION_COLUMNS: &str =
    "id, listing_id, buyer_id, seller_id, created_at, last_activity_at";

pub(super) fn conversation_from_row(r: &SqliteRow) -> Conversation {
    Conversation {
        id: r.get("id"),
        listing_id: r.get("listing_id"),
        buyer_id: r.get("buyer_id"),
        seller_id: r.get("seller_id"),
        created_at: from_micros(r.get("created_at")),
        last_activity_at: from_micros(r.get("last_activity_at")),
    }
}

impl ChatStore {
    /// Return the conversation between `buyer_id` and the listing's owner,
    /// creating it if absent. The bool is true when this call created the row.
    ///
    /// Concurrent callers with the same arguments converge on one row: the
    /// insert is a no-op when the (listing, buyer, seller) triple already exists.
    pub async fn get_or_create(
        &self,
        listing_id: i64,
        buyer_id: i64,
    ) -> Result<(Conversation, bool), ChatError> {
        let listing = self
            .get_listing(listing_id)
            .await?
            .ok_or(ChatError::ListingNotFound)?;
        let seller_id = listing.owner_id;

        if buyer_id == seller_id {
            return Err(ChatError::SelfConversation);
        }

        let now = to_micros(Utc::now());
        let created = sqlx::query(
            r#"
            INSERT INTO conversations (listing_id, buyer_id, seller_id, created_at, last_activity_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (listing_id, buyer_id, seller_id) DO NOTHING
            "#,
        )
        .bind(listing_id)
        .bind(buyer_id)
        .bind(seller_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let sql = format!(
            "SELECT {} FROM conversations WHERE listing_id = ? AND buyer_id = ? AND seller_id = ?",
            CONVERSATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(listing_id)
            .bind(buyer_id)
            .bind(seller_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((conversation_from_row(&row), created))
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, ChatError> {
        let sql = format!("SELECT {} FROM conversations WHERE id = ?", CONVERSATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    /// Conversations where the principal is buyer or seller, most recent activity first.
    pub async fn list_for_principal(
        &self,
        principal_id: i64,
    ) -> Result<Vec<Conversation>, ChatError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM conversations
            WHERE buyer_id = ? OR seller_id = ?
            ORDER BY last_activity_at DESC, id DESC
            "#,
            CONVERSATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(principal_id)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }

    /// The caller's conversation list with participants, last message, and unread counts.
    pub async fn list_summaries_for_principal(
        &self,
        principal_id: i64,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let conversations = self.list_for_principal(principal_id).await?;
        let mut users: HashMap<i64, UserSummary> = HashMap::new();
        let mut summaries = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let buyer = self.cached_user(&mut users, conversation.buyer_id).await?;
            let seller = self.cached_user(&mut users, conversation.seller_id).await?;
            let other_user = if principal_id == conversation.buyer_id {
                seller.clone()
            } else {
                buyer.clone()
            };

            summaries.push(ConversationSummary {
                id: conversation.id,
                listing: self.listing_or_placeholder(&conversation).await?,
                buyer,
                seller,
                other_user,
                last_message: self.last_message(conversation.id).await?,
                unread_count: self.unread_count(conversation.id, principal_id).await?,
                created_at: conversation.created_at,
                updated_at: conversation.last_activity_at,
            });
        }

        Ok(summaries)
    }

    /// Expand a conversation with participants and its ordered message history,
    /// as seen by `viewer_id`.
    pub async fn conversation_detail(
        &self,
        conversation: &Conversation,
        viewer_id: i64,
    ) -> Result<ConversationDetail, ChatError> {
        let mut users: HashMap<i64, UserSummary> = HashMap::new();
        let buyer = self.cached_user(&mut users, conversation.buyer_id).await?;
        let seller = self.cached_user(&mut users, conversation.seller_id).await?;
        let other_user = if viewer_id == conversation.buyer_id {
            seller.clone()
        } else {
            buyer.clone()
        };

        let messages = self
            .list_messages(conversation.id)
            .await?
            .into_iter()
            .map(|m| {
                let sender = users
                    .get(&m.sender_id)
                    .cloned()
                    .unwrap_or_else(|| UserSummary::unknown(m.sender_id));
                MessageView::new(m, sender)
            })
            .collect();

        // Re-read so `updated_at` reflects appends made since the caller loaded it.
        let current = self
            .get_conversation(conversation.id)
            .await?
            .unwrap_or_else(|| conversation.clone());

        Ok(ConversationDetail {
            id: current.id,
            listing: self.listing_or_placeholder(&current).await?,
            buyer,
            seller,
            other_user,
            messages,
            created_at: current.created_at,
            updated_at: current.last_activity_at,
        })
    }

    async fn cached_user(
        &self,
        cache: &mut HashMap<i64, UserSummary>,
        user_id: i64,
    ) -> Result<UserSummary, ChatError> {
        if let Some(user) = cache.get(&user_id) {
            return Ok(user.clone());
        }
        let user = self.user_summary_or_unknown(user_id).await?;
        cache.insert(user_id, user.clone());
        Ok(user)
    }

    async fn listing_or_placeholder(
        &self,
        conversation: &Conversation,
    ) -> Result<Listing, ChatError> {
        Ok(self
            .get_listing(conversation.listing_id)
            .await?
            .unwrap_or_else(|| Listing {
                id: conversation.listing_id,
                owner_id: conversation.seller_id,
                title: String::new(),
            }))
    }
}
