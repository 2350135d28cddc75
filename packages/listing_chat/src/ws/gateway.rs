//! Connection Gateway
//!
//! Admits WebSocket connections to a conversation and pumps frames for the
//! lifetime of each admitted session:
//!
//! ```text
//! Connecting -> Authenticating -> Authorizing -> Active -> Closed
//!                     |                |
//!                     +----------------+--> Closed (rejected, no ack)
//! ```
//!
//! Admission runs before the HTTP upgrade, so a rejected client never sees a
//! `connection_established` frame. The session pump is generic over the socket
//! halves; production passes a split `WebSocket`, tests pass in-memory channels.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::MessageDispatcher;
use super::protocol::{ClientFrame, ServerFrame};
use super::receipts::ReadReceiptTracker;
use super::registry::{ConnectionHandle, ConnectionId, OutboundFrame, Registration, SessionRegistry};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::guard::{Participant, load_authorized};
use crate::metrics::ServerMetrics;
use crate::models::Conversation;
use crate::repository::ChatStore;

const MALFORMED_FRAME: &str = "Invalid message format";
const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authorizing,
    Active,
    Closed,
}

impl ConnectionState {
    fn enter(self, next: ConnectionState, conversation_id: i64) -> ConnectionState {
        debug!(conversation_id, from = ?self, to = ?next, "Connection state change");
        next
    }
}

/// A connection that passed authentication and authorization and may be upgraded.
#[derive(Debug)]
pub struct Admission {
    pub conversation: Conversation,
    pub participant: Participant,
    state: ConnectionState,
}

/// Per-session context shared by the inbound handlers.
struct Session {
    conversation: Conversation,
    principal_id: i64,
    connection_id: ConnectionId,
}

#[derive(Clone)]
pub struct ConnectionGateway {
    store: ChatStore,
    registry: Arc<SessionRegistry>,
    dispatcher: MessageDispatcher,
    receipts: ReadReceiptTracker,
    metrics: Arc<ServerMetrics>,
    config: Arc<ChatConfig>,
    /// Parent of every session's cancellation token.
    shutdown: CancellationToken,
}

impl ConnectionGateway {
    pub fn new(
        store: ChatStore,
        registry: Arc<SessionRegistry>,
        dispatcher: MessageDispatcher,
        receipts: ReadReceiptTracker,
        metrics: Arc<ServerMetrics>,
        config: Arc<ChatConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            receipts,
            metrics,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Close every live session. Sessions admitted afterwards close immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Authenticate and authorize a connection attempt. `principal` is the
    /// identity resolved from the handshake, if any.
    pub async fn admit(
        &self,
        conversation_id: i64,
        principal: Option<i64>,
    ) -> Result<Admission, ChatError> {
        let state = ConnectionState::Connecting.enter(ConnectionState::Authenticating, conversation_id);

        let Some(principal_id) = principal else {
            state.enter(ConnectionState::Closed, conversation_id);
            self.metrics.connection_rejected();
            info!(conversation_id, "Rejected unauthenticated chat connection");
            return Err(ChatError::Unauthenticated);
        };

        let state = state.enter(ConnectionState::Authorizing, conversation_id);
        match load_authorized(&self.store, principal_id, conversation_id).await {
            Ok((conversation, participant)) => Ok(Admission {
                conversation,
                participant,
                state,
            }),
            Err(e) => {
                state.enter(ConnectionState::Closed, conversation_id);
                self.metrics.connection_rejected();
                match e {
                    ChatError::Storage(ref cause) => {
                        error!(conversation_id, principal_id, "Admission failed: {}", cause)
                    }
                    _ => info!(conversation_id, principal_id, "Rejected chat connection: {}", e),
                }
                Err(e)
            }
        }
    }

    /// Run an admitted session until the peer goes away, the socket fails, or
    /// the registry evicts it. Deregistration happens exactly once on every path.
    pub async fn serve<W, R, E>(&self, admission: Admission, sink: W, stream: R)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let Admission {
            conversation,
            participant,
            state,
        } = admission;
        let conversation_id = conversation.id;
        let principal_id = participant.user_id();

        let cancel = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel::<OutboundFrame>(self.config.send_channel_capacity);

        // Queued before joining so the ack precedes every broadcast.
        if tx.try_send(Arc::new(ServerFrame::established())).is_err() {
            warn!(conversation_id, "Failed to queue connection ack");
        }
        let handle = ConnectionHandle::new(principal_id, tx.clone(), cancel.clone());
        let registration =
            self.registry
                .register(conversation_id, handle, self.config.duplicate_connections);
        let connection_id = registration.connection_id();

        let state = state.enter(ConnectionState::Active, conversation_id);
        self.metrics.connection_opened();
        info!(
            conversation_id,
            connection_id = %connection_id,
            principal_id,
            connections = self.registry.connection_count(conversation_id),
            "Chat connection active"
        );

        let session = Session {
            conversation,
            principal_id,
            connection_id,
        };

        tokio::join!(
            write_loop(sink, rx, cancel.clone(), connection_id),
            self.read_loop(&session, stream, tx, registration, cancel),
        );

        state.enter(ConnectionState::Closed, conversation_id);
        self.metrics.connection_closed();
        info!(conversation_id, connection_id = %connection_id, "Chat connection closed");
    }

    async fn read_loop<R, E>(
        &self,
        session: &Session,
        mut stream: R,
        tx: mpsc::Sender<OutboundFrame>,
        registration: Registration,
        cancel: CancellationToken,
    ) where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(connection_id = %session.connection_id, "Session cancelled");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_text(session, &tx, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => {
                    self.metrics.malformed_frame();
                    reply(&tx, ServerFrame::error(MALFORMED_FRAME)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by the socket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %session.connection_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }

        // Leave before the local sender drops so the writer drains and ends.
        registration.release();
        drop(tx);
    }

    async fn handle_text(&self, session: &Session, tx: &mpsc::Sender<OutboundFrame>, text: &str) {
        let frame = match ClientFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection_id = %session.connection_id, "Malformed frame: {}", e);
                self.metrics.malformed_frame();
                reply(tx, ServerFrame::error(MALFORMED_FRAME)).await;
                return;
            }
        };

        let result = match frame {
            ClientFrame::ChatMessage { message } => self.send_message(session, &message).await,
            ClientFrame::MarkRead => self
                .receipts
                .flush(&session.conversation, session.principal_id)
                .await
                .map(|_| ()),
        };

        if let Err(e) = result {
            let message = match e {
                ChatError::Validation(message) => {
                    self.metrics.validation_error();
                    message
                }
                other => {
                    error!(
                        conversation_id = session.conversation.id,
                        connection_id = %session.connection_id,
                        "Failed to handle chat frame: {}",
                        other
                    );
                    self.metrics.internal_error();
                    INTERNAL_ERROR.to_string()
                }
            };
            reply(tx, ServerFrame::error(message)).await;
        }
    }

    /// Persist and broadcast in one turn, so broadcasts follow commit order.
    async fn send_message(&self, session: &Session, text: &str) -> Result<(), ChatError> {
        let conversation_id = session.conversation.id;
        let _turn = self.registry.turn(conversation_id).await;

        let event = self
            .dispatcher
            .handle_send(&session.conversation, session.principal_id, text)
            .await?;
        self.metrics.message_persisted();

        let exclude = (!self.config.echo_to_sender).then_some(session.connection_id);
        let report = self.registry.broadcast(conversation_id, event, exclude);
        self.metrics.record_broadcast(&report);
        Ok(())
    }
}

/// Send a frame to this connection only.
async fn reply(tx: &mpsc::Sender<OutboundFrame>, frame: ServerFrame) {
    if tx.send(Arc::new(frame)).await.is_err() {
        debug!("Outbound queue closed before reply");
    }
}

/// Forward queued frames to the socket until every sender is gone or the
/// session is cancelled, then close the socket.
async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
    connection_id: ConnectionId,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let json = match serde_json::to_string(&*frame) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize frame: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!(connection_id = %connection_id, "WebSocket send failed: {}", e);
            cancel.cancel();
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection_id = %connection_id, "WebSocket close failed: {}", e);
    }
}
