use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    response::{IntoResponse, Response},
};
use futures::StreamExt;

use crate::AppState;
use crate::auth::MaybeAuthUser;

/// WebSocket endpoint for one conversation.
///
/// Admission runs before the upgrade: unauthenticated callers get 401 and
/// non-participants 404, and neither ever receives a frame.
pub async fn chat_websocket_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    maybe_user: MaybeAuthUser,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let principal = maybe_user.0.map(|u| u.user_id);
    let admission = match state.gateway.admit(conversation_id, principal).await {
        Ok(admission) => admission,
        Err(e) => return e.into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        gateway.serve(admission, sink, stream).await;
    })
}
