use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Upper bound on message length, counted in characters of the trimmed text.
pub const MAX_MESSAGE_CHARS: usize = 2500;

// === Conversation models ===

/// A buyer/seller thread about one listing. Unique per (listing, buyer, seller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// === Collaborator views (rows owned by the accounts and listings apps) ===

/// Public profile fields of a user, embedded in messages and conversation listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
}

impl UserSummary {
    /// Placeholder for a user row that has disappeared underneath us.
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            profile_image_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
}

// === API views ===

/// A persisted message with its sender expanded, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub content: String,
    pub sender: UserSummary,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageView {
    pub fn new(message: Message, sender: UserSummary) -> Self {
        Self {
            id: message.id,
            content: message.content,
            sender,
            is_read: message.is_read,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub sender_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Row of the caller's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub listing: Listing,
    pub buyer: UserSummary,
    pub seller: UserSummary,
    pub other_user: UserSummary,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full conversation including ordered message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: i64,
    pub listing: Listing,
    pub buyer: UserSummary,
    pub seller: UserSummary,
    pub other_user: UserSummary,
    pub messages: Vec<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trim `raw` and check it fits in a message. Returns the trimmed text.
pub fn validate_content(raw: &str) -> Result<&str, ChatError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ChatError::Validation("Message cannot be empty".into()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(text)
}

/// Microseconds since the epoch, the storage representation of every timestamp.
pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims() {
        assert_eq!(validate_content("  hello \n").unwrap(), "hello");
    }

    #[test]
    fn validate_rejects_blank() {
        let err = validate_content("   \t").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn validate_length_boundary() {
        let max = "q".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(validate_content(&max).unwrap().len(), MAX_MESSAGE_CHARS);

        let over = "q".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            validate_content(&over),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn validate_counts_characters_not_bytes() {
        // 2500 two-byte characters is still within the limit
        let text = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_content(&text).is_ok());
    }

    #[test]
    fn validate_ignores_surrounding_whitespace_for_length() {
        let padded = format!("   {}   ", "q".repeat(MAX_MESSAGE_CHARS));
        assert!(validate_content(&padded).is_ok());
    }

    #[test]
    fn micros_round_trip_preserves_precision() {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(ts)), ts);
    }
}
