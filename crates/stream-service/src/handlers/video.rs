//! Recording handlers: chunk upload, sectioned download, ranged playback
//! and metadata.

use crate::auth::AuthenticatedUser;
use crate::chunks::ByteRange;
use crate::errors::StreamError;
use crate::models::{validate_stream_name, ChunkUploadQuery, DownloadQuery, VideoMetaResponse};
use crate::routes::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

const VIDEO_CONTENT_TYPE: &str = "video/webm";

fn checked_name(name: &str) -> Result<(), StreamError> {
    validate_stream_name(name).map_err(StreamError::BadRequest)
}

fn header_value(value: &str) -> Result<HeaderValue, StreamError> {
    HeaderValue::from_str(value)
        .map_err(|e| StreamError::Internal(format!("invalid header value: {e}")))
}

/// Handler for POST /api/video/chunk?name=<name>
///
/// Appends the raw body to the caller's recording.
///
/// # Response
///
/// - 204 No Content once the append is committed
/// - 400 for an invalid name or empty body
/// - 409 when the name belongs to another streamer
#[instrument(skip_all, name = "stream.video.chunk", fields(name = %query.name, user_id = %user.user_id, bytes = body.len()))]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ChunkUploadQuery>,
    body: Bytes,
) -> Result<StatusCode, StreamError> {
    checked_name(&query.name)?;
    state
        .storage
        .ingest(&query.name, &user.user_id, body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/video/:name?i=<section>
///
/// Streams one section of the recording as an attachment.
#[instrument(skip_all, name = "stream.video.download", fields(name = %name))]
pub async fn download_video(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, StreamError> {
    checked_name(&name)?;
    let download = state
        .storage
        .download(&name, query.section.unwrap_or(0))
        .await?;

    let disposition = format!("attachment; filename=\"{}.webm\"", download.metadata.name);
    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(VIDEO_CONTENT_TYPE),
    );
    headers.insert(header::CONTENT_DISPOSITION, header_value(&disposition)?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.len));
    Ok(response)
}

/// Handler for GET /api/video/playback/:name
///
/// Serves the requested `Range`, or the live edge when none is given.
///
/// # Response
///
/// - 206 Partial Content with `Content-Range`
/// - 200 with an empty body for a recording with no bytes yet
/// - 400 for a malformed `Range` header
/// - 416 when the range starts at or past the end
#[instrument(skip_all, name = "stream.video.playback", fields(name = %name))]
pub async fn playback_video(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, StreamError> {
    checked_name(&name)?;
    let range = headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| "Range header is not ASCII".to_string())
                .and_then(ByteRange::parse)
        })
        .transpose()
        .map_err(StreamError::BadRequest)?;

    let slice = state.storage.playback(&name, range).await?;

    let status = if slice.bytes.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::PARTIAL_CONTENT
    };
    let content_length = slice.bytes.len();

    let mut response = (status, slice.bytes).into_response();
    let out = response.headers_mut();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(VIDEO_CONTENT_TYPE),
    );
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    if status == StatusCode::PARTIAL_CONTENT {
        let content_range = format!("bytes {}-{}/{}", slice.start, slice.end - 1, slice.size);
        out.insert(header::CONTENT_RANGE, header_value(&content_range)?);
    }
    Ok(response)
}

/// Handler for GET /api/video/meta/:name
#[instrument(skip_all, name = "stream.video.meta", fields(name = %name))]
pub async fn video_metadata(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<VideoMetaResponse>, StreamError> {
    checked_name(&name)?;
    let metadata = state.storage.metadata(&name).await?;
    Ok(Json(VideoMetaResponse {
        size: metadata.size_bytes,
        seconds: metadata.duration_seconds,
    }))
}
