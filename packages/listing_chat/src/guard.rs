//! Participant check shared by every entry point that touches a conversation:
//! WebSocket admission, message send, mark-read, and detail retrieval.

use crate::error::ChatError;
use crate::models::Conversation;
use crate::repository::ChatStore;

/// Which side of the conversation an authorized principal is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Buyer(i64),
    Seller(i64),
}

impl Participant {
    pub fn user_id(&self) -> i64 {
        match *self {
            Participant::Buyer(id) | Participant::Seller(id) => id,
        }
    }
}

/// Decide whether `principal_id` may act on `conversation`.
///
/// Non-participants get `NotFound`, the same answer as for a conversation
/// that does not exist.
pub fn authorize(principal_id: i64, conversation: &Conversation) -> Result<Participant, ChatError> {
    if principal_id == conversation.buyer_id {
        Ok(Participant::Buyer(principal_id))
    } else if principal_id == conversation.seller_id {
        Ok(Participant::Seller(principal_id))
    } else {
        Err(ChatError::NotFound)
    }
}

/// Load a conversation by id and authorize the principal against it.
pub async fn load_authorized(
    store: &ChatStore,
    principal_id: i64,
    conversation_id: i64,
) -> Result<(Conversation, Participant), ChatError> {
    let conversation = store
        .get_conversation(conversation_id)
        .await?
        .ok_or(ChatError::NotFound)?;
    let participant = authorize(principal_id, &conversation)?;
    Ok((conversation, participant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{self, seed_marketplace};
    use chrono::Utc;

    fn conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: 7,
            listing_id: 10,
            buyer_id: 1,
            seller_id: 2,
            created_at: now,
            last_activity_at: now,
        }
    }

    #[test]
    fn buyer_and_seller_are_authorized() {
        let c = conversation();
        assert_eq!(authorize(1, &c).unwrap(), Participant::Buyer(1));
        assert_eq!(authorize(2, &c).unwrap(), Participant::Seller(2));
        assert_eq!(authorize(2, &c).unwrap().user_id(), 2);
    }

    #[test]
    fn outsider_sees_not_found() {
        let c = conversation();
        assert!(matches!(authorize(3, &c), Err(ChatError::NotFound)));
    }

    #[tokio::test]
    async fn missing_and_foreign_conversations_look_identical() {
        let store = test_helpers::test_store().await;
        seed_marketplace(&store).await;
        let (c, _) = store.get_or_create(10, 1).await.unwrap();

        let missing = load_authorized(&store, 3, 9999).await.unwrap_err();
        let foreign = load_authorized(&store, 3, c.id).await.unwrap_err();
        assert_eq!(missing.status(), foreign.status());
        assert_eq!(missing.client_message(), foreign.client_message());

        let (loaded, who) = load_authorized(&store, 1, c.id).await.unwrap();
        assert_eq!(loaded.id, c.id);
        assert_eq!(who, Participant::Buyer(1));
    }
}
