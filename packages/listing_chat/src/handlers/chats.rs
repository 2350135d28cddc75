use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ChatError;
use crate::guard::load_authorized;
use crate::models::{ConversationDetail, ConversationSummary};

#[derive(Debug, Deserialize)]
pub struct GetOrCreateRequest {
    #[serde(default)]
    pub listing_id: Option<i64>,
}

/// Conversations the caller takes part in, most recent activity first.
pub async fn list_chats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    let summaries = state.store.list_summaries_for_principal(user.user_id).await?;
    Ok(Json(summaries))
}

/// Open (or reopen) the caller's thread with the owner of a listing.
pub async fn get_or_create_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<GetOrCreateRequest>,
) -> Result<(StatusCode, Json<ConversationDetail>), ChatError> {
    let listing_id = req.listing_id.ok_or(ChatError::MissingField("listing_id"))?;
    let (conversation, created) = state.store.get_or_create(listing_id, user.user_id).await?;

    let status = if created {
        info!(
            conversation_id = conversation.id,
            listing_id,
            buyer_id = user.user_id,
            "Conversation created"
        );
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let detail = state
        .store
        .conversation_detail(&conversation, user.user_id)
        .await?;
    Ok((status, Json(detail)))
}

/// Conversation detail. Viewing it counts as reading it.
pub async fn get_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationDetail>, ChatError> {
    let (conversation, _) = load_authorized(&state.store, user.user_id, id).await?;
    state.receipts.flush(&conversation, user.user_id).await?;
    let detail = state
        .store
        .conversation_detail(&conversation, user.user_id)
        .await?;
    Ok(Json(detail))
}

pub async fn mark_chat_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let (conversation, _) = load_authorized(&state.store, user.user_id, id).await?;
    let updated = state.receipts.flush(&conversation, user.user_id).await?;
    Ok(Json(serde_json::json!({
        "detail": "Messages marked as read.",
        "updated": updated,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthState, auth_middleware};
    use crate::config::DuplicateConnectionPolicy;
    use crate::repository::test_helpers::{seed_marketplace, seed_session};
    use crate::ws::protocol::ServerFrame;
    use crate::ws::registry::ConnectionHandle;
    use axum::{
        Router,
        body::Body,
        http::Request,
        middleware,
        routing::{get, post},
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn test_router() -> (Router, AppState) {
        let state = crate::test_helpers::test_app_state().await;
        seed_marketplace(&state.store).await;
        seed_session(&state.store, "buyer-token", 1).await;
        seed_session(&state.store, "seller-token", 2).await;
        seed_session(&state.store, "other-token", 3).await;

        let router = Router::new()
            .route("/api/chats", get(list_chats))
            .route("/api/chats/get-or-create", post(get_or_create_chat))
            .route("/api/chats/{id}", get(get_chat))
            .route("/api/chats/{id}/mark-read", post(mark_chat_read))
            .layer(middleware::from_fn_with_state(
                AuthState {
                    store: state.store.clone(),
                },
                auth_middleware,
            ))
            .with_state(state.clone());
        (router, state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_requires_authentication() {
        let (app, _) = test_router().await;
        let (status, json) = send(&app, "GET", "/api/chats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["detail"].is_string());

        let (status, _) = send(&app, "GET", "/api/chats", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_or_create_then_existing() {
        let (app, _) = test_router().await;

        let (status, created) = send(
            &app,
            "POST",
            "/api/chats/get-or-create",
            Some("buyer-token"),
            Some(r#"{"listing_id": 10}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["buyer"]["id"], 1);
        assert_eq!(created["seller"]["id"], 2);
        assert_eq!(created["other_user"]["id"], 2);
        assert_eq!(created["listing"]["id"], 10);
        assert!(created["messages"].as_array().unwrap().is_empty());

        let (status, existing) = send(
            &app,
            "POST",
            "/api/chats/get-or-create",
            Some("buyer-token"),
            Some(r#"{"listing_id": 10}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(existing["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_get_or_create_errors() {
        let (app, _) = test_router().await;

        let (status, json) = send(
            &app,
            "POST",
            "/api/chats/get-or-create",
            Some("buyer-token"),
            Some("{}"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "listing_id is required.");

        let (status, _) = send(
            &app,
            "POST",
            "/api/chats/get-or-create",
            Some("buyer-token"),
            Some(r#"{"listing_id": 404}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(
            &app,
            "POST",
            "/api/chats/get-or-create",
            Some("seller-token"),
            Some(r#"{"listing_id": 10}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "You cannot chat with yourself.");
    }

    #[tokio::test]
    async fn test_list_chats_for_both_sides() {
        let (app, state) = test_router().await;
        let (conversation, _) = state.store.get_or_create(10, 1).await.unwrap();
        state
            .store
            .append_message(conversation.id, 1, "Is this still available?")
            .await
            .unwrap();

        let (status, seller_list) = send(&app, "GET", "/api/chats", Some("seller-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = seller_list.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["other_user"]["id"], 1);
        assert_eq!(entries[0]["unread_count"], 1);
        assert_eq!(
            entries[0]["last_message"]["content"],
            "Is this still available?"
        );

        let (_, other_list) = send(&app, "GET", "/api/chats", Some("other-token"), None).await;
        assert!(other_list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_chat_marks_read_and_broadcasts() {
        let (app, state) = test_router().await;
        let (conversation, _) = state.store.get_or_create(10, 1).await.unwrap();
        state
            .store
            .append_message(conversation.id, 1, "hello")
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        state.registry.join(
            conversation.id,
            ConnectionHandle::new(1, tx, CancellationToken::new()),
            DuplicateConnectionPolicy::Allow,
        );

        let uri = format!("/api/chats/{}", conversation.id);
        let (status, detail) = send(&app, "GET", &uri, Some("seller-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["messages"][0]["content"], "hello");
        assert_eq!(detail["messages"][0]["is_read"], true);

        assert_eq!(*rx.recv().await.unwrap(), ServerFrame::MarkRead { user_id: 2 });

        // Second view has nothing left to mark
        send(&app, "GET", &uri, Some("seller-token"), None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_chat_hidden_from_outsiders() {
        let (app, state) = test_router().await;
        let (conversation, _) = state.store.get_or_create(10, 1).await.unwrap();

        let uri = format!("/api/chats/{}", conversation.id);
        let (status, foreign) = send(&app, "GET", &uri, Some("other-token"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, missing) = send(&app, "GET", "/api/chats/9999", Some("other-token"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(foreign, missing);
    }

    #[tokio::test]
    async fn test_mark_read_reports_count() {
        let (app, state) = test_router().await;
        let (conversation, _) = state.store.get_or_create(10, 1).await.unwrap();
        state.store.append_message(conversation.id, 2, "message 1").await.unwrap();
        state.store.append_message(conversation.id, 2, "message 2").await.unwrap();

        let uri = format!("/api/chats/{}/mark-read", conversation.id);
        let (status, json) = send(&app, "POST", &uri, Some("buyer-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["detail"], "Messages marked as read.");
        assert_eq!(json["updated"], 2);

        let (_, json) = send(&app, "POST", &uri, Some("buyer-token"), None).await;
        assert_eq!(json["updated"], 0);

        let (status, _) = send(&app, "POST", &uri, Some("other-token"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
