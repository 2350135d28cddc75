use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();

    let status = if metrics.errors.internal == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: metrics.connections.active,
        conversations: state.registry.conversation_count() as u64,
        messages_persisted: metrics.chat.messages_persisted,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 if the database answers
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db.pool).await.is_ok();

    if db_ok {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(health_live_handler))
            .route("/health/ready", get(health_ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let state = crate::test_helpers::test_app_state().await;
        state.metrics.connection_opened();

        let (status, json) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 1);
        assert_eq!(json["conversations"], 0);
    }

    #[tokio::test]
    async fn test_health_degraded_after_internal_error() {
        let state = crate::test_helpers::test_app_state().await;
        state.metrics.internal_error();

        let (_, json) = get_json(router(state), "/health").await;
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn test_live_and_ready() {
        let state = crate::test_helpers::test_app_state().await;

        let (status, json) = get_json(router(state.clone()), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");

        let (status, json) = get_json(router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["database"], "connected");
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let state = crate::test_helpers::test_app_state().await;
        state.metrics.message_persisted();

        let (status, json) = get_json(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["chat"]["messages_persisted"], 1);
        assert!(json["uptime_secs"].is_u64());
    }
}
