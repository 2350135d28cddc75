use std::sync::Arc;

use tracing::debug;

use crate::error::ChatError;
use crate::guard::authorize;
use crate::metrics::ServerMetrics;
use crate::models::Conversation;
use crate::repository::ChatStore;

use super::protocol::ServerFrame;
use super::registry::SessionRegistry;

/// Result of marking a conversation read on behalf of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// At least one message flipped to read; `event` announces it.
    Marked { updated: u64, event: ServerFrame },
    /// Nothing was unread.
    NoOp,
}

/// Marks messages read and tells the conversation about it. Used by the
/// WebSocket `mark_read` frame and by the REST detail and mark-read routes,
/// so both paths announce receipts the same way.
#[derive(Clone)]
pub struct ReadReceiptTracker {
    store: ChatStore,
    registry: Arc<SessionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl ReadReceiptTracker {
    pub fn new(
        store: ChatStore,
        registry: Arc<SessionRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Flip the other participant's unread messages to read.
    pub async fn handle_mark_read(
        &self,
        conversation: &Conversation,
        reader_id: i64,
    ) -> Result<ReceiptOutcome, ChatError> {
        authorize(reader_id, conversation)?;

        let updated = self.store.mark_read(conversation.id, reader_id).await?;
        if updated == 0 {
            return Ok(ReceiptOutcome::NoOp);
        }
        Ok(ReceiptOutcome::Marked {
            updated,
            event: ServerFrame::MarkRead { user_id: reader_id },
        })
    }

    /// `handle_mark_read`, then broadcast the receipt to every connection in
    /// the conversation. Returns the number of messages marked.
    pub async fn flush(&self, conversation: &Conversation, reader_id: i64) -> Result<u64, ChatError> {
        match self.handle_mark_read(conversation, reader_id).await? {
            ReceiptOutcome::Marked { updated, event } => {
                let report = self.registry.broadcast(conversation.id, event, None);
                self.metrics.read_receipt();
                self.metrics.record_broadcast(&report);
                debug!(
                    conversation_id = conversation.id,
                    reader_id,
                    updated,
                    delivered = report.delivered,
                    "Read receipt broadcast"
                );
                Ok(updated)
            }
            ReceiptOutcome::NoOp => Ok(0),
        }
    }
}
