pub mod chats;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use chats::{get_chat, get_or_create_chat, list_chats, mark_chat_read};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use websocket::chat_websocket_handler;
