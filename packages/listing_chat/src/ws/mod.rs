//! Real-time chat over WebSockets
//!
//! One connection per (client, conversation). The gateway admits and pumps
//! each connection; the registry fans events out to every connection
//! subscribed to a conversation.

mod dispatch;
mod gateway;
pub(crate) mod protocol;
mod receipts;
pub(crate) mod registry;

pub use dispatch::MessageDispatcher;
pub use gateway::ConnectionGateway;
pub use receipts::ReadReceiptTracker;
pub use registry::SessionRegistry;
