use crate::error::ChatError;
use crate::guard::authorize;
use crate::models::{Conversation, MessageView, validate_content};
use crate::repository::ChatStore;

use super::protocol::ServerFrame;

/// Turns an inbound `chat_message` into a persisted message and the
/// broadcast event describing it.
#[derive(Clone)]
pub struct MessageDispatcher {
    store: ChatStore,
}

impl MessageDispatcher {
    pub fn new(store: ChatStore) -> Self {
        Self { store }
    }

    /// Validate, persist, and describe one message. Every lookup happens
    /// before the insert, so an error always means nothing was stored.
    pub async fn handle_send(
        &self,
        conversation: &Conversation,
        sender_id: i64,
        raw_text: &str,
    ) -> Result<ServerFrame, ChatError> {
        let text = validate_content(raw_text)?;
        authorize(sender_id, conversation)?;
        let sender = self.store.user_summary_or_unknown(sender_id).await?;

        let message = self
            .store
            .append_message(conversation.id, sender_id, text)
            .await?;

        Ok(ServerFrame::ChatMessage {
            message: MessageView::new(message, sender),
        })
    }
}
