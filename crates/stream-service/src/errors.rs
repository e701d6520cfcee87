//! Stream service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Store, timeout and internal failures collapse to one generic 500 so no
//! storage detail reaches a client; the detail is logged server-side.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stream service error type.
///
/// - Database, Timeout, Internal: 500 Internal Server Error
/// - Unauthorized: 401 Unauthorized
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - BadRequest: 400 Bad Request
/// - RangeNotSatisfiable: 416 Range Not Satisfiable
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Range not satisfiable for size {size}")]
    RangeNotSatisfiable { size: u64 },

    #[error("Deadline exceeded: {0}")]
    Timeout(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            StreamError::Database(_) | StreamError::Timeout(_) | StreamError::Internal(_) => 500,
            StreamError::Unauthorized(_) => 401,
            StreamError::NotFound(_) => 404,
            StreamError::Conflict(_) => 409,
            StreamError::BadRequest(_) => 400,
            StreamError::RangeNotSatisfiable { .. } => 416,
        }
    }

    /// Short label for the `status` dimension of store metrics.
    #[must_use]
    pub fn metric_status(&self) -> &'static str {
        match self {
            StreamError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            StreamError::Database(err) => {
                tracing::error!(target: "stream.database", error = %err, "Database operation failed");
                internal()
            }
            StreamError::Timeout(operation) => {
                tracing::error!(target: "stream.database", operation, "Store deadline exceeded");
                internal()
            }
            StreamError::Internal(err) => {
                tracing::error!(target: "stream.internal", error = %err, "Internal failure");
                internal()
            }
            StreamError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", reason.clone())
            }
            StreamError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            StreamError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            StreamError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            StreamError::RangeNotSatisfiable { size } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "RANGE_NOT_SATISFIABLE",
                format!("Requested range is outside 0-{size}"),
            ),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response();

        match &self {
            StreamError::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Identity realm=\"stream-service\""),
                );
            }
            StreamError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }

        response
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl From<sqlx::Error> for StreamError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StreamError::NotFound("Recording not found".to_string()),
            other => StreamError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_database_error() {
        let error = StreamError::Database("connection refused".to_string());
        assert_eq!(format!("{error}"), "Database error: connection refused");
    }

    #[test]
    fn test_display_range_not_satisfiable() {
        let error = StreamError::RangeNotSatisfiable { size: 30 };
        assert_eq!(format!("{error}"), "Range not satisfiable for size 30");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StreamError::Database(String::new()).status_code(), 500);
        assert_eq!(StreamError::Timeout("fetch_chunk").status_code(), 500);
        assert_eq!(StreamError::Internal(String::new()).status_code(), 500);
        assert_eq!(StreamError::Unauthorized(String::new()).status_code(), 401);
        assert_eq!(StreamError::NotFound(String::new()).status_code(), 404);
        assert_eq!(StreamError::Conflict(String::new()).status_code(), 409);
        assert_eq!(StreamError::BadRequest(String::new()).status_code(), 400);
        assert_eq!(StreamError::RangeNotSatisfiable { size: 1 }.status_code(), 416);
    }

    #[tokio::test]
    async fn test_database_error_is_generic_to_client() {
        let response =
            StreamError::Database("relation vid_chunks does not exist".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
        assert!(!body.to_string().contains("vid_chunks"));
    }

    #[tokio::test]
    async fn test_timeout_and_internal_share_response() {
        let timeout = StreamError::Timeout("commit_ingest").into_response();
        let internal = StreamError::Internal("mailbox closed".to_string()).into_response();
        assert_eq!(timeout.status(), internal.status());

        let a = read_body_json(timeout.into_body()).await;
        let b = read_body_json(internal.into_body()).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_not_found_keeps_message() {
        let response = StreamError::NotFound("Recording not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Recording not found");
    }

    #[tokio::test]
    async fn test_unauthorized_sets_www_authenticate() {
        let response = StreamError::Unauthorized("Missing identity".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_range_not_satisfiable_sets_content_range() {
        let response = StreamError::RangeNotSatisfiable { size: 4096 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */4096"
        );
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let error: StreamError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, StreamError::NotFound(_)));
    }

    #[test]
    fn test_from_sqlx_other_is_database() {
        let error: StreamError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(error, StreamError::Database(_)));
    }
}
