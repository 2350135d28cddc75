//! WebSocket Protocol Types
//!
//! Frames exchanged over a conversation's real-time channel. Both directions
//! are tagged by a `type` field.

use serde::{Deserialize, Serialize};

use crate::models::MessageView;

/// Frames sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Post a message to the conversation. Trimmed and validated server-side.
    ChatMessage { message: String },
    /// Mark the other participant's messages as read.
    MarkRead,
}

impl ClientFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Frames sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every admitted connection.
    ConnectionEstablished { message: String },
    /// A newly persisted message, broadcast to the conversation.
    ChatMessage { message: MessageView },
    /// `user_id` has read the messages addressed to them.
    MarkRead { user_id: i64 },
    /// Sent only to the connection whose frame failed.
    Error { message: String },
}

impl ServerFrame {
    pub fn established() -> Self {
        ServerFrame::ConnectionEstablished {
            message: "Connected to chat".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}
