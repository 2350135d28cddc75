//! Authentication: bearer tokens issued by the accounts app.
//!
//! The middleware resolves a token from the `Authorization: Bearer` header or,
//! for browser WebSocket handshakes that cannot set headers, the `token` query
//! parameter. It never rejects on its own; handlers opt in through the
//! `AuthUser` (401 when missing) or `MaybeAuthUser` extractors.

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, Uri, header},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use tracing::{debug, error};

use crate::error::ChatError;
use crate::repository::ChatStore;

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated principal, attached to the request by `auth_middleware`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

/// Optional auth user (for endpoints that decide themselves what to do without one).
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub store: ChatStore,
}

// =============================================================================
// Auth Middleware
// =============================================================================

pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = request_token(request.headers(), request.uri()) {
        match auth_state.store.principal_for_token(&token).await {
            Ok(Some(user_id)) => {
                request.extensions_mut().insert(AuthUser { user_id });
            }
            Ok(None) => debug!("Unknown or expired token"),
            // Treated as anonymous; the extractor then answers 401
            Err(e) => error!("Token lookup failed: {}", e),
        }
    }

    next.run(request).await
}

/// Header token wins over the query parameter.
fn request_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    bearer_token(headers).or_else(|| query_token(uri))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get("token").filter(|t| !t.is_empty()).cloned()
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or(ChatError::Unauthenticated)
    }
}

/// Extract optional AuthUser from request extensions.
impl<S> axum::extract::FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthUser>().copied()))
    }
}
