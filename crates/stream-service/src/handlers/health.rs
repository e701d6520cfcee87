//! Health check handlers.
//!
//! - `/health`: liveness, returns OK if the process is running
//! - `/ready`: readiness, checks that the recording store answers

use crate::models::ReadinessResponse;
use crate::repositories::with_deadline;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Does not check dependencies; failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 when the store answers a ping within the request deadline,
/// 503 otherwise. The error text is generic; the cause is logged.
#[tracing::instrument(skip_all, name = "stream.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ping = with_deadline(
        "ping",
        state.config.deadlines.request,
        state.store.ping(),
    )
    .await;

    match ping {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                database: "healthy",
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "stream.http", error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    database: "unhealthy",
                    error: Some("Service dependencies unavailable".to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_not_ready_serialization_hides_detail() {
        let body = serde_json::to_value(ReadinessResponse {
            status: "not_ready",
            database: "unhealthy",
            error: Some("Service dependencies unavailable".to_string()),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "status": "not_ready",
                "database": "unhealthy",
                "error": "Service dependencies unavailable"
            })
        );
    }

    #[test]
    fn test_ready_serialization_omits_error() {
        let body = serde_json::to_value(ReadinessResponse {
            status: "ready",
            database: "healthy",
            error: None,
        })
        .unwrap();
        assert!(body.get("error").is_none());
    }
}
